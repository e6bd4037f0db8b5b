use std::collections::HashMap;

use super::units::UnitId;

/// One unit name stored at an accept node, in insertion order.
#[derive(Debug, Clone)]
struct TrieEntry {
    unit: UnitId,
    /// The name as spelled in the dataset, for case tie-breaks.
    name: String,
}

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    terminals: Vec<TrieEntry>,
}

/// Result of a longest-match lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieMatch {
    pub unit: UnitId,
    /// Bytes of input consumed.
    pub length: usize,
    /// The dataset spelling that won the tie-break.
    pub name: String,
}

/// Character trie over lowercased unit names. Every accept node keeps all
/// units ending there so the case tie-break can run after the structural
/// match is chosen.
#[derive(Debug, Default)]
pub struct UnitTrie {
    root: TrieNode,
}

fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

impl UnitTrie {
    pub fn insert(&mut self, name: &str, unit: UnitId) {
        let mut node = &mut self.root;
        for c in name.chars() {
            node = node.children.entry(fold(c)).or_default();
        }
        node.terminals.push(TrieEntry {
            unit,
            name: name.to_string(),
        });
    }

    /// Walk the trie from the start of `input`, remembering the deepest
    /// accept node. A single stored unit wins outright; otherwise prefer an
    /// exact case-sensitive spelling, then the greatest count of case-equal
    /// positions, then insertion order.
    pub fn find_longest_match(&self, input: &str) -> Option<TrieMatch> {
        let mut node = &self.root;
        let mut best: Option<(&TrieNode, usize)> = None;
        let mut consumed = 0;

        for c in input.chars() {
            match node.children.get(&fold(c)) {
                Some(next) => {
                    consumed += c.len_utf8();
                    node = next;
                    if !node.terminals.is_empty() {
                        best = Some((node, consumed));
                    }
                }
                None => break,
            }
        }

        let (node, length) = best?;
        let matched = &input[..length];

        if node.terminals.len() == 1 {
            let entry = &node.terminals[0];
            return Some(TrieMatch {
                unit: entry.unit,
                length,
                name: entry.name.clone(),
            });
        }

        if let Some(entry) = node.terminals.iter().find(|e| e.name == matched) {
            return Some(TrieMatch {
                unit: entry.unit,
                length,
                name: entry.name.clone(),
            });
        }

        let mut winner = &node.terminals[0];
        let mut winner_score = case_equal_positions(&winner.name, matched);
        for entry in &node.terminals[1..] {
            let score = case_equal_positions(&entry.name, matched);
            if score > winner_score {
                winner = entry;
                winner_score = score;
            }
        }
        Some(TrieMatch {
            unit: winner.unit,
            length,
            name: winner.name.clone(),
        })
    }
}

fn case_equal_positions(name: &str, input: &str) -> usize {
    name.chars()
        .zip(input.chars())
        .filter(|(a, b)| a == b)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_match_prefers_deepest_node() {
        let mut trie = UnitTrie::default();
        trie.insert("m", UnitId(0));
        trie.insert("min", UnitId(1));
        trie.insert("meter", UnitId(0));
        trie.insert("meters", UnitId(0));

        let m = trie.find_longest_match("m").unwrap();
        assert_eq!((m.unit, m.length), (UnitId(0), 1));

        let min = trie.find_longest_match("min").unwrap();
        assert_eq!((min.unit, min.length), (UnitId(1), 3));

        let meters = trie.find_longest_match("meters").unwrap();
        assert_eq!((meters.unit, meters.length), (UnitId(0), 6));
    }

    #[test]
    fn case_tie_break_prefers_exact_spelling() {
        let mut trie = UnitTrie::default();
        trie.insert("pm", UnitId(7));
        trie.insert("Pm", UnitId(8));

        assert_eq!(trie.find_longest_match("pm").unwrap().unit, UnitId(7));
        assert_eq!(trie.find_longest_match("Pm").unwrap().unit, UnitId(8));
        // No exact spelling: greatest case-equal count, then insertion order.
        assert_eq!(trie.find_longest_match("PM").unwrap().unit, UnitId(8));
    }

    #[test]
    fn no_match_on_unknown_prefix() {
        let mut trie = UnitTrie::default();
        trie.insert("kg", UnitId(3));
        assert_eq!(trie.find_longest_match("xyz"), None);
    }
}
