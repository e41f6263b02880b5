//! Calculator REPL built on the conch engine.
//!
//! Demonstrates command registration with aliases and options, piping
//! (`add 1 2 | round`), and a mode sub-REPL (`calc`) that evaluates
//! arithmetic lines directly. `help` lists commands; `exit` quits.

use std::io::Write;

use anyhow::Result;
use conch_core::{ActionFlow, ConchError, Engine, EngineConfig};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader, stdin};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let engine = Engine::new(EngineConfig {
        delimiter: "calc$ ".to_string(),
        ..EngineConfig::default()
    })?;
    register_commands(&engine)?;
    engine.observe(|event| log::debug!("event: {event:?}"));
    engine.show();

    println!("conch calculator. Type `help` for commands, `exit` to quit.");

    let mut lines = BufReader::new(stdin()).lines();
    loop {
        print!("{}", engine.session().full_delimiter());
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match engine.exec(&line).await {
            Ok(value) if value.get("exit").and_then(Value::as_bool) == Some(true) => break,
            Ok(_) => {},
            Err(ConchError::Action(message) | ConchError::Usage(message)) => {
                println!("{message}");
            },
            // Parse failures were already reported through the session.
            Err(_) => {},
        }
    }
    Ok(())
}

fn register_commands(engine: &Engine) -> Result<()> {
    let add = engine.command("add [numbers...]")?;
    add.describe("Adds numbers left to right.").action(|ctx, args| {
        let total: f64 = args
            .arg_list("numbers")
            .unwrap_or_default()
            .iter()
            .filter_map(|n| n.parse::<f64>().ok())
            .sum();
        ctx.log(total);
        ActionFlow::ok(json!(total))
    });
    engine.alias(&add, "sum")?;
    engine.alias(&add, "plus")?;

    engine
        .command("round [number]")?
        .describe("Rounds a number, from its argument or piped input.")
        .option("-p, --places <n>", "Digits to keep after the point.")?
        .action(|ctx, args| {
            let input = args
                .arg_str("number")
                .map(str::to_string)
                .or_else(|| ctx.stdin());
            let Some(value) = input.as_deref().and_then(|s| s.trim().parse::<f64>().ok()) else {
                return ActionFlow::err(ConchError::Usage(
                    "round needs a number, as an argument or on stdin".to_string(),
                ));
            };
            let places: u32 = args
                .option_str("places")
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);
            let scale = 10f64.powi(places as i32);
            let rounded = (value * scale).round() / scale;
            ctx.log(rounded);
            ActionFlow::ok(json!(rounded))
        });

    engine
        .mode("calc")?
        .describe("Evaluates arithmetic lines, left to right.")
        .delimiter("calc> ")
        .init(|ctx, _| {
            ctx.log("Evaluator ready. Type `exit` to leave.");
            ActionFlow::unit()
        })?
        .action(|ctx, args| {
            let expr = args.raw().unwrap_or_default();
            match eval(expr) {
                Some(value) => {
                    ctx.log(value);
                    ActionFlow::ok(json!(value))
                },
                None => ActionFlow::err(ConchError::Usage(format!("cannot evaluate `{expr}`"))),
            }
        });
    Ok(())
}

/// Evaluate `1 + 2 * 3` style expressions strictly left to right.
fn eval(expr: &str) -> Option<f64> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in expr.chars() {
        match c {
            '0'..='9' | '.' => current.push(c),
            '+' | '-' | '*' | '/' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            },
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            },
            _ => return None,
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    let mut iter = tokens.into_iter();
    let mut acc: f64 = iter.next()?.parse().ok()?;
    while let Some(op) = iter.next() {
        let rhs: f64 = iter.next()?.parse().ok()?;
        match op.as_str() {
            "+" => acc += rhs,
            "-" => acc -= rhs,
            "*" => acc *= rhs,
            "/" => acc /= rhs,
            _ => return None,
        }
    }
    Some(acc)
}
