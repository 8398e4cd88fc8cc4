//! Tokenizes a file with a TextMate grammar and prints the tokens.
//!
//! Usage:
//!   ocra-cli --grammar grammars/rust.json src/main.rs
//!   ocra-cli --config ocra.json --scope source.rust --output ansi src/main.rs
use std::fmt::Write;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use ocra::{BinaryToken, Color, Error, FontStyle, Registry, RegistryConfig, StackElement, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    /// One token per line with its scopes
    Scopes,
    /// The tokens of each line as a JSON array
    Json,
    /// The file coloured with the theme, for truecolor terminals
    Ansi,
}

#[derive(Debug, Parser)]
#[command(version, about = "Tokenize a file with a TextMate grammar")]
struct Cli {
    /// File to tokenize
    file: PathBuf,
    /// Grammar files to load. The first one is used unless --scope is given
    #[arg(short, long)]
    grammar: Vec<PathBuf>,
    /// Registry configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Scope name of the grammar to tokenize with
    #[arg(short, long)]
    scope: Option<String>,
    /// VS Code theme file
    #[arg(short, long)]
    theme: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t = Output::Scopes)]
    output: Output,
    /// Time limit per line, in milliseconds
    #[arg(long)]
    time_limit: Option<u64>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<String, Box<dyn std::error::Error>> {
    let registry = match &cli.config {
        Some(path) => Registry::from_config(&RegistryConfig::load_from_file(path)?)?,
        None => Registry::new(),
    };
    let mut first_scope = None;
    for path in &cli.grammar {
        let scope = registry.add_grammar_from_path(path)?;
        first_scope.get_or_insert(scope);
    }
    if let Some(theme) = &cli.theme {
        registry.set_theme_from_path(theme)?;
    }

    let Some(scope) = cli.scope.clone().or(first_scope) else {
        return Err("no grammar to use, pass --grammar or --scope".into());
    };
    let grammar = registry
        .load_grammar(&scope)?
        .ok_or_else(|| Error::GrammarNotFound(scope.clone()))?;

    let text = fs::read_to_string(&cli.file)?;
    let time_limit = cli.time_limit.map(Duration::from_millis);
    let color_map = registry.color_map();
    let mut state: Option<Arc<StackElement>> = None;
    let mut out = String::new();

    for (idx, line) in text.lines().enumerate() {
        let stopped_early = match cli.output {
            Output::Ansi => {
                let result = grammar.tokenize_line_binary(line, state.as_ref(), time_limit);
                render_ansi(line, &result.tokens, &color_map, &mut out);
                state = Some(result.next_state);
                result.stopped_early
            }
            Output::Scopes => {
                let result = grammar.tokenize_line(line, state.as_ref(), time_limit);
                render_scopes(idx + 1, line, &result.tokens, &mut out);
                state = Some(result.next_state);
                result.stopped_early
            }
            Output::Json => {
                let result = grammar.tokenize_line(line, state.as_ref(), time_limit);
                out.push_str(&serde_json::to_string(&result.tokens)?);
                out.push('\n');
                state = Some(result.next_state);
                result.stopped_early
            }
        };
        if stopped_early {
            log::warn!("Line {} hit the time limit", idx + 1);
        }
    }

    Ok(out)
}

fn render_scopes(line_number: usize, line: &str, tokens: &[Token], out: &mut String) {
    let chars: Vec<char> = line.chars().collect();
    for token in tokens {
        let text: String = chars[token.start..token.end].iter().collect();
        let scopes: Vec<&str> = token.scopes.iter().map(|s| s.as_str()).collect();
        let _ = writeln!(
            out,
            "{line_number}:{}..{} {text:?} {}",
            token.start,
            token.end,
            scopes.join(" ")
        );
    }
}

fn render_ansi(line: &str, tokens: &[BinaryToken], color_map: &[String], out: &mut String) {
    let chars: Vec<char> = line.chars().collect();
    for (i, token) in tokens.iter().enumerate() {
        let end = tokens.get(i + 1).map_or(chars.len(), |next| next.start);
        let text: String = chars[token.start..end].iter().collect();

        let mut params = Vec::new();
        let font_style = token.metadata.font_style();
        for (style, code) in [
            (FontStyle::BOLD, "1"),
            (FontStyle::ITALIC, "3"),
            (FontStyle::UNDERLINE, "4"),
            (FontStyle::STRIKETHROUGH, "9"),
        ] {
            if font_style.contains(style) {
                params.push(code.to_string());
            }
        }
        if let Some(color) = color_map
            .get(token.metadata.foreground() as usize)
            .and_then(|hex| Color::from_hex(hex).ok())
        {
            let mut fg = String::new();
            color.as_ansi_fg(&mut fg);
            params.push(fg);
        }

        if params.is_empty() {
            out.push_str(&text);
        } else {
            let _ = write!(out, "\x1b[{}m{text}\x1b[0m", params.join(";"));
        }
    }
    out.push('\n');
}
