//! Command-line evaluator.
//!
//! ```text
//! jexl -e '1 + 2 * 3'
//! jexl -e 'a + b' a=1 b=2
//! jexl script.jexl user='{"name": "ada"}' --flags '-strict'
//! ```
//!
//! Context bindings are `name=json`; a value that fails to parse as JSON
//! binds as a plain string. The evaluation result prints as JSON when it
//! maps cleanly, as display text otherwise.

use std::{env, fs, process::ExitCode};

use jexl::{Engine, EngineBuilder, JexlContext, MapContext, Value};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let parsed = match CliArgs::parse(&args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("error: {message}");
            eprintln!("usage: jexl [-e EXPR | FILE] [name=json ...] [--flags FLAGS]");
            return ExitCode::FAILURE;
        }
    };

    let source = match parsed.source {
        Source::Inline(text) => text,
        Source::File(path) => match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                eprintln!("error: cannot read {path}: {err}");
                return ExitCode::FAILURE;
            }
        },
    };

    let mut builder = EngineBuilder::new();
    if let Some(flags) = &parsed.flags {
        builder = match builder.flags(flags) {
            Ok(builder) => builder,
            Err(err) => {
                eprintln!("error: {err}");
                return ExitCode::FAILURE;
            }
        };
    }
    let engine: Engine = builder.create();

    let script = match engine.create_script(&source) {
        Ok(script) => script,
        Err(err) => {
            eprintln!("error:\n{err}");
            return ExitCode::FAILURE;
        }
    };

    let mut ctx = MapContext::new();
    for (name, value) in parsed.bindings {
        ctx.set(&name, value);
    }

    match script.execute(&mut ctx) {
        Ok(result) => {
            println!("{}", render(&result));
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error:\n{err}");
            ExitCode::FAILURE
        }
    }
}

enum Source {
    Inline(String),
    File(String),
}

struct CliArgs {
    source: Source,
    bindings: Vec<(String, Value)>,
    flags: Option<String>,
}

impl CliArgs {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut source = None;
        let mut bindings = Vec::new();
        let mut flags = None;
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-e" => {
                    let text = iter.next().ok_or("-e requires an expression")?;
                    source = Some(Source::Inline(text.clone()));
                }
                "--flags" => {
                    let value = iter.next().ok_or("--flags requires a flag string")?;
                    flags = Some(value.clone());
                }
                other => {
                    if let Some((name, raw)) = other.split_once('=') {
                        let value = match serde_json::from_str::<serde_json::Value>(raw) {
                            Ok(json) => Value::from_json(&json),
                            Err(_) => Value::string(raw),
                        };
                        bindings.push((name.to_string(), value));
                    } else if source.is_none() {
                        source = Some(Source::File(other.to_string()));
                    } else {
                        return Err(format!("unexpected argument '{other}'"));
                    }
                }
            }
        }
        Ok(Self {
            source: source.ok_or("no expression or script file given")?,
            bindings,
            flags,
        })
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Object(_) | Value::Lambda(_) | Value::Pattern(_) | Value::Range(_) => value.to_string(),
        other => serde_json::to_string(&other.to_json()).unwrap_or_else(|_| other.to_string()),
    }
}
