use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, ContentArrangement, Table};

use reckon::{CalcOutput, LineType};

fn type_label(t: LineType) -> &'static str {
    match t {
        LineType::Heading => "heading",
        LineType::Comment => "comment",
        LineType::Empty => "",
        LineType::Expression => "expr",
        LineType::Definition => "def",
        LineType::PlainText => "text",
    }
}

/// Source lines alongside their results, errors marked in the last
/// column.
pub fn print_table(source: &str, out: &CalcOutput) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![Cell::new("Line"), Cell::new("Result"), Cell::new("")]);

    for (line, result) in source.lines().zip(&out.results) {
        table.add_row(vec![
            Cell::new(line),
            Cell::new(result.result.as_deref().unwrap_or("")),
            Cell::new(if result.has_error { "error" } else { "" }),
        ]);
    }

    println!("{table}");
}

/// One result string per input line, blank for pass-through lines. This
/// is the gutter view an editor would render.
pub fn print_plain(out: &CalcOutput) {
    for result in &out.results {
        match (&result.result, result.has_error) {
            (Some(text), false) => println!("{text}"),
            (Some(message), true) => println!("error: {message}"),
            (None, _) => println!(),
        }
    }
}

pub fn print_json(out: &CalcOutput) {
    let results: Vec<serde_json::Value> = out
        .results
        .iter()
        .map(|r| {
            serde_json::json!({
                "type": type_label(r.line_type),
                "result": r.result,
                "hasError": r.has_error,
            })
        })
        .collect();

    let errors = serde_json::json!({
        "lexer": out.errors.lexer.iter().map(|e| e.message.clone()).collect::<Vec<_>>(),
        "parser": out.errors.parser.iter().map(|e| e.message.clone()).collect::<Vec<_>>(),
        "runtime": out.errors.runtime.iter().map(|e| e.message.clone()).collect::<Vec<_>>(),
    });

    let output = serde_json::json!({
        "results": results,
        "errors": errors,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&output).expect("JSON serialization failed")
    );
}
