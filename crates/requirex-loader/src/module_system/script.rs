// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! ModScript: the built-in, line-oriented module language
//!
//! ```text
//! # comment
//! const config = require("./config.json")
//! exports.port = config.port
//! global.started = true
//! module.exports.name = "api";
//! ```
//!
//! One statement per line:
//!
//! - `const x = <expr>` / `let x = <expr>`
//! - `exports.a.b = <expr>`, `module.exports.a = <expr>`
//! - `module.exports = <expr>`
//! - `global.a = <expr>`
//! - `require("<spec>")`
//! - `sleep(<ms>)`
//! - `throw <expr>`
//!
//! An expression is `require("<spec>")` with an optional `.path`, a JSON
//! literal, or an identifier with an optional `.path`.

use crate::error::{LoaderError, Result};
use crate::fs::IoMode;
use crate::module_system::executor::{Executor, ModuleContext};
use crate::value::Exports;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Executor for ModScript source
#[derive(Debug, Clone, Copy, Default)]
pub struct ModScript;

#[async_trait]
impl Executor for ModScript {
    async fn execute(&self, ctx: &ModuleContext, source: &str, mode: IoMode) -> Result<()> {
        let mut locals = HashMap::new();
        for (index, raw) in source.lines().enumerate() {
            let line = index + 1;
            let Some(text) = clean_line(raw) else {
                continue;
            };
            let statement = Statement::parse(text).map_err(|msg| fault(ctx, line, msg))?;
            run(ctx, &mut locals, statement, mode, line).await?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
enum Statement<'a> {
    Bind { name: &'a str, expr: Expr<'a> },
    SetExport { path: Vec<&'a str>, expr: Expr<'a> },
    ReplaceExports(Expr<'a>),
    SetGlobal { name: &'a str, expr: Expr<'a> },
    Require(String),
    Sleep(u64),
    Throw(Expr<'a>),
}

#[derive(Debug, PartialEq)]
enum Expr<'a> {
    Require { specifier: String, path: Vec<&'a str> },
    Ident(Vec<&'a str>),
    Literal(Value),
}

impl<'a> Statement<'a> {
    fn parse(line: &'a str) -> std::result::Result<Self, String> {
        if let Some(rest) = line
            .strip_prefix("const ")
            .or_else(|| line.strip_prefix("let "))
        {
            let (name, expr) = rest
                .split_once('=')
                .ok_or_else(|| "expected `=` in binding".to_string())?;
            let name = name.trim();
            if !is_ident(name) {
                return Err(format!("invalid binding name `{name}`"));
            }
            return Ok(Self::Bind {
                name,
                expr: Expr::parse(expr.trim())?,
            });
        }

        if let Some(rest) = line.strip_prefix("throw ") {
            return Ok(Self::Throw(Expr::parse(rest.trim())?));
        }

        if let Some(rest) = line.strip_prefix("sleep(") {
            let ms = rest
                .strip_suffix(')')
                .and_then(|ms| ms.trim().parse::<u64>().ok())
                .ok_or_else(|| "sleep expects a duration in milliseconds".to_string())?;
            return Ok(Self::Sleep(ms));
        }

        if let Some((target, expr)) = split_assignment(line) {
            let expr = Expr::parse(expr)?;
            let target: Vec<&str> = target.split('.').collect();
            return match target.as_slice() {
                ["module", "exports"] => Ok(Self::ReplaceExports(expr)),
                ["module", "exports", path @ ..] | ["exports", path @ ..] if !path.is_empty() => {
                    Ok(Self::SetExport {
                        path: path.to_vec(),
                        expr,
                    })
                }
                ["global", name] => Ok(Self::SetGlobal { name: *name, expr }),
                _ => Err(format!("cannot assign to `{}`", target.join("."))),
            };
        }

        if line.starts_with("require(") {
            let (specifier, path) = parse_require(line)?;
            if !path.is_empty() {
                return Err("property access has no effect here".to_string());
            }
            return Ok(Self::Require(specifier));
        }

        Err(format!("unrecognised statement `{line}`"))
    }
}

impl<'a> Expr<'a> {
    fn parse(text: &'a str) -> std::result::Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("missing expression".to_string());
        }
        if text.starts_with("require(") {
            let (specifier, path) = parse_require(text)?;
            return Ok(Self::Require { specifier, path });
        }
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            return Ok(Self::Literal(value));
        }
        let path = parse_path(text).ok_or_else(|| format!("malformed expression `{text}`"))?;
        Ok(Self::Ident(path))
    }
}

async fn run(
    ctx: &ModuleContext,
    locals: &mut HashMap<String, Value>,
    statement: Statement<'_>,
    mode: IoMode,
    line: usize,
) -> Result<()> {
    match statement {
        Statement::Bind { name, expr } => {
            let value = eval(ctx, locals, expr, mode, line).await?;
            locals.insert(name.to_string(), value);
        }
        Statement::SetExport { path, expr } => {
            let value = eval(ctx, locals, expr, mode, line).await?;
            ctx.record.with_exports_mut(|exports| exports.set_path(&path, value));
        }
        Statement::ReplaceExports(Expr::Require { specifier, path }) if path.is_empty() => {
            // Keeps native and core exports intact
            let exports = ctx.require.load_with(&specifier, mode).await?;
            ctx.record.set_exports(exports);
        }
        Statement::ReplaceExports(expr) => {
            let value = eval(ctx, locals, expr, mode, line).await?;
            ctx.record.set_exports(Exports::from(value));
        }
        Statement::SetGlobal { name, expr } => {
            let value = eval(ctx, locals, expr, mode, line).await?;
            ctx.scope.set(name, value);
        }
        Statement::Require(specifier) => {
            ctx.require.load_with(&specifier, mode).await?;
        }
        Statement::Sleep(ms) => {
            let duration = Duration::from_millis(ms);
            match mode {
                IoMode::Async => tokio::time::sleep(duration).await,
                IoMode::Sync => std::thread::sleep(duration),
            }
        }
        Statement::Throw(expr) => {
            let value = eval(ctx, locals, expr, mode, line).await?;
            return Err(LoaderError::evaluation(&ctx.filename, render(&value)));
        }
    }
    Ok(())
}

async fn eval(
    ctx: &ModuleContext,
    locals: &HashMap<String, Value>,
    expr: Expr<'_>,
    mode: IoMode,
    line: usize,
) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value),
        Expr::Require { specifier, path } => {
            let exports = ctx.require.load_with(&specifier, mode).await?;
            Ok(walk(exports.to_json(), &path))
        }
        Expr::Ident(path) => lookup(ctx, locals, &path).map_err(|msg| fault(ctx, line, msg)),
    }
}

fn lookup(
    ctx: &ModuleContext,
    locals: &HashMap<String, Value>,
    path: &[&str],
) -> std::result::Result<Value, String> {
    let Some((head, rest)) = path.split_first() else {
        return Err("missing identifier".to_string());
    };

    let (base, rest) = match *head {
        name if locals.contains_key(name) => (locals[name].clone(), rest),
        "exports" => (ctx.record.exports().to_json(), rest),
        "module" => match rest.split_first() {
            Some((&"exports", rest)) => (ctx.record.exports().to_json(), rest),
            _ => return Err("only `module.exports` is readable on `module`".to_string()),
        },
        "__filename" => (Value::String(ctx.filename.display().to_string()), rest),
        "__dirname" => (Value::String(ctx.dirname.display().to_string()), rest),
        "global" => match rest.split_first() {
            Some((name, rest)) => (ctx.scope.get(name).unwrap_or(Value::Null), rest),
            None => (Value::Object(ctx.scope.snapshot()), rest),
        },
        name => match ctx.scope.get(name) {
            Some(value) => (value, rest),
            None => return Err(format!("unknown identifier `{name}`")),
        },
    };
    Ok(walk(base, rest))
}

fn walk(mut value: Value, path: &[&str]) -> Value {
    for key in path {
        value = match &value {
            Value::Array(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null),
            other => other.get(*key).cloned().unwrap_or(Value::Null),
        };
    }
    value
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn fault(ctx: &ModuleContext, line: usize, message: impl std::fmt::Display) -> LoaderError {
    LoaderError::evaluation(&ctx.filename, format!("line {line}: {message}"))
}

fn clean_line(raw: &str) -> Option<&str> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
        return None;
    }
    let line = line.strip_suffix(';').unwrap_or(line).trim_end();
    (!line.is_empty()).then_some(line)
}

/// Split `target = expr` when `target` is a dotted name
fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let idx = line.find('=')?;
    let (target, rest) = (line[..idx].trim(), &line[idx + 1..]);
    if rest.starts_with('=') {
        return None;
    }
    parse_path(target)?;
    Some((target, rest.trim()))
}

/// `require("<spec>")` followed by an optional `.path`
fn parse_require(text: &str) -> std::result::Result<(String, Vec<&str>), String> {
    let rest = &text["require(".len()..];
    let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<String>();
    let specifier = match stream.next() {
        Some(Ok(specifier)) => specifier,
        _ => return Err("require expects a string literal".to_string()),
    };
    let after = rest[stream.byte_offset()..].trim_start();
    let after = after
        .strip_prefix(')')
        .ok_or_else(|| "expected `)` after the require specifier".to_string())?;

    if after.is_empty() {
        return Ok((specifier, Vec::new()));
    }
    let path = after
        .strip_prefix('.')
        .and_then(|p| {
            let segments: Vec<&str> = p.split('.').collect();
            segments.iter().all(|s| is_segment(s)).then_some(segments)
        })
        .ok_or_else(|| format!("unexpected `{after}` after require"))?;
    Ok((specifier, path))
}

fn parse_path(text: &str) -> Option<Vec<&str>> {
    let segments: Vec<&str> = text.split('.').collect();
    let (head, rest) = segments.split_first()?;
    (is_ident(head) && rest.iter().all(|s| is_segment(s))).then_some(segments)
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn is_segment(s: &str) -> bool {
    is_ident(s) || (!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_bindings_and_exports() {
        assert_eq!(
            Statement::parse("const port = 8080").unwrap(),
            Statement::Bind {
                name: "port",
                expr: Expr::Literal(json!(8080)),
            }
        );
        assert_eq!(
            Statement::parse("exports.server.port = port").unwrap(),
            Statement::SetExport {
                path: vec!["server", "port"],
                expr: Expr::Ident(vec!["port"]),
            }
        );
        assert_eq!(
            Statement::parse("module.exports.name = \"a=b\"").unwrap(),
            Statement::SetExport {
                path: vec!["name"],
                expr: Expr::Literal(json!("a=b")),
            }
        );
        assert!(matches!(
            Statement::parse("module.exports = {\"a\": 1}").unwrap(),
            Statement::ReplaceExports(Expr::Literal(_))
        ));
        assert!(matches!(
            Statement::parse("global.ready = true").unwrap(),
            Statement::SetGlobal { name: "ready", .. }
        ));
    }

    #[test]
    fn test_parse_require_forms() {
        assert_eq!(
            Statement::parse("require(\"./side-effect\")").unwrap(),
            Statement::Require("./side-effect".to_string())
        );
        assert_eq!(
            Expr::parse("require(\"./config.json\").db.hosts.0").unwrap(),
            Expr::Require {
                specifier: "./config.json".to_string(),
                path: vec!["db", "hosts", "0"],
            }
        );
        assert!(Expr::parse("require(./bare)").is_err());
        assert!(Expr::parse("require(\"a\")(1)").is_err());
    }

    #[test]
    fn test_parse_control_statements() {
        assert_eq!(Statement::parse("sleep(25)").unwrap(), Statement::Sleep(25));
        assert!(Statement::parse("sleep(soon)").is_err());
        assert!(matches!(
            Statement::parse("throw \"boom\"").unwrap(),
            Statement::Throw(Expr::Literal(_))
        ));
    }

    #[test]
    fn test_malformed_lines() {
        assert!(Statement::parse("exports = 1").is_err());
        assert!(Statement::parse("const 1x = 2").is_err());
        assert!(Statement::parse("print(\"hi\")").is_err());
        assert!(Expr::parse("a..b").is_err());
    }

    #[test]
    fn test_clean_line_and_walk() {
        assert_eq!(clean_line("  exports.a = 1;  "), Some("exports.a = 1"));
        assert_eq!(clean_line("# note"), None);
        assert_eq!(clean_line("// note"), None);
        assert_eq!(clean_line(";"), None);

        let value = json!({ "list": [10, 20] });
        assert_eq!(walk(value.clone(), &["list", "1"]), json!(20));
        assert_eq!(walk(value, &["missing", "deeper"]), Value::Null);
    }
}
