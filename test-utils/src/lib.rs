use std::error::Error;

use cmm::lexer::Lexer;
use cmm::parser::Parser;
use cmm::translator::Translator;

/// Run a source snippet through the whole pipeline and return the emitted
/// assembly listing.
pub fn compile_to_asm(source: &str) -> Result<String, Box<dyn Error>> {
    let mut parser = Parser::from_lexer(Lexer::from_source(source));
    let program = parser.parse()?;

    let mut translator = Translator::new();
    translator.translate(&program)?;
    Ok(translator.finish())
}

/// The listing's rows without indentation, for order-of-emission asserts.
pub fn compile_to_rows(source: &str) -> Result<Vec<String>, Box<dyn Error>> {
    Ok(compile_to_asm(source)?
        .lines()
        .map(|line| line.trim_start().to_owned())
        .collect())
}

/// Assert that `rows` contains `expected` as a contiguous run.
pub fn assert_contains_sequence(rows: &[String], expected: &[&str]) {
    let found = rows
        .windows(expected.len())
        .any(|window| window.iter().zip(expected).all(|(row, exp)| row == exp));
    assert!(
        found,
        "expected sequence {expected:#?} not found in listing:\n{}",
        rows.join("\n")
    );
}

/// Index of the first row starting with `prefix`, panicking when absent.
pub fn row_index(rows: &[String], prefix: &str) -> usize {
    rows.iter()
        .position(|row| row.starts_with(prefix))
        .unwrap_or_else(|| panic!("no row starting with '{prefix}' in:\n{}", rows.join("\n")))
}
