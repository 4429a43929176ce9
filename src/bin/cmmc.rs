use clap::Parser as CliParser;
use colored::Colorize;
use log::{error, info};

use cmm::diagnostics;
use cmm::lexer::Lexer;
use cmm::parser::Parser;
use cmm::translator::Translator;

#[derive(CliParser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Source file to compile.
    file: std::path::PathBuf,

    /// Where to write the assembly listing.
    #[arg(short, long, default_value = "output.a")]
    output: std::path::PathBuf,

    /// Dump the syntax tree after parsing.
    #[arg(long)]
    ast: bool,
}

fn main() {
    simple_logger::init_with_level(log::Level::Warn).unwrap();
    let args = Cli::parse();

    let lexer = match Lexer::from_path(&args.file) {
        Ok(lexer) => lexer,
        Err(e) => {
            error!("Could not read file '{}': {e}", args.file.to_string_lossy());
            return;
        }
    };

    let mut parser = Parser::from_lexer(lexer);
    let program = match parser.parse() {
        Ok(program) => program,
        Err(e) => {
            println!("{e}");
            return;
        }
    };

    if args.ast {
        println!("{}", "Parsing successful. Abstract syntax tree:".green());
        println!("{}", program.ast_string(parser.types()));
    }

    info!("Generating code...");
    let mut translator = Translator::new();
    if let Err(e) = translator.translate(&program) {
        println!("{e}");
        return;
    }

    println!(
        "{}",
        format!(
            "Compiled with {} warning(s) and no errors.",
            diagnostics::warning_count()
        )
        .green()
    );

    if let Err(e) = std::fs::write(&args.output, translator.finish()) {
        error!(
            "Could not write '{}': {e}",
            args.output.to_string_lossy()
        );
    }
}
