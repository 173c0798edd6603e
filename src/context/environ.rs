//! Turning a resolved context into environment bindings.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Write as _};

use super::ResolvedContext;

/// One environment operation declared by a package.
///
/// `alias`, `info`, `error`, `comment` and `source` only mean something to an
/// interactive shell: [`Environment::render`] emits them and
/// [`Environment::apply`] leaves the environment untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum EnvOp {
    Setenv { name: String, value: String },
    Unsetenv { name: String },
    Prependenv { name: String, value: String },
    Appendenv { name: String, value: String },
    Alias { name: String, value: String },
    Info { value: String },
    Error { value: String },
    Comment { value: String },
    Source { value: String },
}

impl EnvOp {
    /// The variable or alias this operation names, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            EnvOp::Setenv { name, .. }
            | EnvOp::Unsetenv { name }
            | EnvOp::Prependenv { name, .. }
            | EnvOp::Appendenv { name, .. }
            | EnvOp::Alias { name, .. } => Some(name),
            EnvOp::Info { .. } | EnvOp::Error { .. } | EnvOp::Comment { .. } | EnvOp::Source { .. } => {
                None
            }
        }
    }

    /// The environment variable this operation changes.
    fn variable(&self) -> Option<&str> {
        match self {
            EnvOp::Alias { .. } => None,
            other => other.name(),
        }
    }

    /// Whether the name, if any, is a plain `[A-Za-z_][A-Za-z0-9_]*` identifier.
    ///
    /// Names are written unquoted into rendered scripts, so anything else
    /// must be refused before it gets there.
    pub fn has_valid_name(&self) -> bool {
        self.name().is_none_or(is_var_name)
    }

    /// Substitute `{root}`, `{name}` and `{version}` for one package.
    fn expand_placeholders(&self, root: &str, name: &str, version: &str) -> EnvOp {
        let expand = |text: &str| {
            text.replace("{root}", root)
                .replace("{name}", name)
                .replace("{version}", version)
        };
        match self {
            EnvOp::Setenv { name: var, value } => EnvOp::Setenv {
                name: var.clone(),
                value: expand(value),
            },
            EnvOp::Unsetenv { name: var } => EnvOp::Unsetenv { name: var.clone() },
            EnvOp::Prependenv { name: var, value } => EnvOp::Prependenv {
                name: var.clone(),
                value: expand(value),
            },
            EnvOp::Appendenv { name: var, value } => EnvOp::Appendenv {
                name: var.clone(),
                value: expand(value),
            },
            EnvOp::Alias { name: alias, value } => EnvOp::Alias {
                name: alias.clone(),
                value: expand(value),
            },
            EnvOp::Info { value } => EnvOp::Info { value: expand(value) },
            EnvOp::Error { value } => EnvOp::Error { value: expand(value) },
            EnvOp::Comment { value } => EnvOp::Comment { value: expand(value) },
            EnvOp::Source { value } => EnvOp::Source { value: expand(value) },
        }
    }
}

/// Separator used when joining path-like variables.
pub fn path_separator() -> char {
    if cfg!(windows) { ';' } else { ':' }
}

/// Output dialect for [`Environment::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Shell {
    Sh,
    Csh,
    /// Windows `cmd.exe` batch syntax.
    Cmd,
}

/// Ordered environment bindings derived from a context.
///
/// Later operations shadow earlier ones, and packages appear dependencies
/// first, so a dependent's bindings win over its dependencies'.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Environment {
    ops: Vec<EnvOp>,
}

/// Build the bindings of `context`, identified by `context_id`.
pub fn materialize(context: &ResolvedContext, context_id: &str) -> Environment {
    let mut ops = Vec::new();

    for package in &context.packages {
        let root = package.root.to_string_lossy();
        let prefix = format!("PINENV_{}", package.name.to_uppercase());
        ops.push(EnvOp::Setenv {
            name: format!("{}_ROOT", prefix),
            value: root.to_string(),
        });
        ops.push(EnvOp::Setenv {
            name: format!("{}_VERSION", prefix),
            value: package.version.clone(),
        });

        match &package.commands {
            Some(commands) => ops.extend(
                commands
                    .iter()
                    .map(|op| op.expand_placeholders(&root, &package.name, &package.version)),
            ),
            None => ops.push(EnvOp::Prependenv {
                name: "PATH".to_string(),
                value: format!("{}/bin", root),
            }),
        }
    }

    ops.push(EnvOp::Setenv {
        name: "PINENV_CONTEXT".to_string(),
        value: context_id.to_string(),
    });
    ops.push(EnvOp::Setenv {
        name: "PINENV_USED_RESOLVE".to_string(),
        value: context.used_resolve(),
    });

    Environment { ops }
}

impl Environment {
    pub fn ops(&self) -> &[EnvOp] {
        &self.ops
    }

    /// Apply the bindings on top of `base`.
    ///
    /// `prependenv`/`appendenv` join onto an existing value when the variable
    /// was already set by this environment, or when `respect_parent` is set
    /// and `base` defines it. Otherwise they replace it.
    pub fn apply(
        &self,
        base: &BTreeMap<String, String>,
        respect_parent: bool,
    ) -> BTreeMap<String, String> {
        let mut env = base.clone();
        let mut touched: HashSet<&str> = HashSet::new();
        let sep = path_separator();

        for op in &self.ops {
            let Some(name) = op.variable() else {
                continue;
            };
            let joins = touched.contains(name) || respect_parent;
            match op {
                EnvOp::Setenv { value, .. } => {
                    let value = expand_vars(value, &env);
                    env.insert(name.to_string(), value);
                }
                EnvOp::Unsetenv { .. } => {
                    env.remove(name);
                }
                EnvOp::Prependenv { value, .. } => {
                    let value = expand_vars(value, &env);
                    let joined = match env.get(name) {
                        Some(existing) if joins && !existing.is_empty() => {
                            format!("{}{}{}", value, sep, existing)
                        }
                        _ => value,
                    };
                    env.insert(name.to_string(), joined);
                }
                EnvOp::Appendenv { value, .. } => {
                    let value = expand_vars(value, &env);
                    let joined = match env.get(name) {
                        Some(existing) if joins && !existing.is_empty() => {
                            format!("{}{}{}", existing, sep, value)
                        }
                        _ => value,
                    };
                    env.insert(name.to_string(), joined);
                }
                _ => {}
            }
            touched.insert(name);
        }

        env
    }

    /// Shell script text that applies these bindings when sourced.
    pub fn render(&self, shell: Shell) -> String {
        let mut out = String::new();
        for op in &self.ops {
            let _ = match shell {
                Shell::Sh => render_sh(&mut out, op),
                Shell::Csh => render_csh(&mut out, op),
                Shell::Cmd => render_cmd(&mut out, op),
            };
        }
        out
    }
}

fn render_sh(out: &mut String, op: &EnvOp) -> fmt::Result {
    let sep = path_separator();
    match op {
        EnvOp::Setenv { name, value } => writeln!(out, "export {}=\"{}\"", name, quote(value)),
        EnvOp::Unsetenv { name } => writeln!(out, "unset {}", name),
        EnvOp::Prependenv { name, value } => writeln!(
            out,
            "export {n}=\"{v}${{{n}:+{s}${n}}}\"",
            n = name,
            v = quote(value),
            s = sep
        ),
        EnvOp::Appendenv { name, value } => writeln!(
            out,
            "export {n}=\"${{{n}:+${n}{s}}}{v}\"",
            n = name,
            v = quote(value),
            s = sep
        ),
        EnvOp::Alias { name, value } => writeln!(out, "alias {}={}", name, single_quote(value)),
        EnvOp::Info { value } => writeln!(out, "echo \"{}\"", quote(value)),
        EnvOp::Error { value } => writeln!(out, "echo \"{}\" 1>&2", quote(value)),
        EnvOp::Comment { value } => comment_lines(out, "#", value),
        EnvOp::Source { value } => writeln!(out, ". \"{}\"", quote(value)),
    }
}

fn render_csh(out: &mut String, op: &EnvOp) -> fmt::Result {
    let sep = path_separator();
    match op {
        EnvOp::Setenv { name, value } => writeln!(out, "setenv {} \"{}\"", name, quote(value)),
        EnvOp::Unsetenv { name } => writeln!(out, "unsetenv {}", name),
        EnvOp::Prependenv { name, value } => writeln!(
            out,
            "if ( $?{n} ) then\n    setenv {n} \"{v}{s}${{{n}}}\"\nelse\n    setenv {n} \"{v}\"\nendif",
            n = name,
            v = quote(value),
            s = sep
        ),
        EnvOp::Appendenv { name, value } => writeln!(
            out,
            "if ( $?{n} ) then\n    setenv {n} \"${{{n}}}{s}{v}\"\nelse\n    setenv {n} \"{v}\"\nendif",
            n = name,
            v = quote(value),
            s = sep
        ),
        EnvOp::Alias { name, value } => writeln!(out, "alias {} {}", name, single_quote(value)),
        EnvOp::Info { value } => writeln!(out, "echo \"{}\"", quote(value)),
        EnvOp::Error { value } => writeln!(out, "echo \"{}\" > /dev/stderr", quote(value)),
        EnvOp::Comment { value } => comment_lines(out, "#", value),
        EnvOp::Source { value } => writeln!(out, "source \"{}\"", quote(value)),
    }
}

/// cmd.exe always joins path lists with `;`.
fn render_cmd(out: &mut String, op: &EnvOp) -> fmt::Result {
    match op {
        EnvOp::Setenv { name, value } => writeln!(out, "set \"{}={}\"", name, cmd_value(value)),
        EnvOp::Unsetenv { name } => writeln!(out, "set {}=", name),
        EnvOp::Prependenv { name, value } => writeln!(
            out,
            "if defined {n} (set \"{n}={v};%{n}%\") else (set \"{n}={v}\")",
            n = name,
            v = cmd_value(value)
        ),
        EnvOp::Appendenv { name, value } => writeln!(
            out,
            "if defined {n} (set \"{n}=%{n}%;{v}\") else (set \"{n}={v}\")",
            n = name,
            v = cmd_value(value)
        ),
        EnvOp::Alias { name, value } => writeln!(out, "doskey {}={}", name, cmd_value(value)),
        EnvOp::Info { value } => cmd_echo_lines(out, value, ""),
        EnvOp::Error { value } => cmd_echo_lines(out, value, " 1>&2"),
        EnvOp::Comment { value } => comment_lines(out, "rem", value),
        EnvOp::Source { value } => writeln!(out, "call \"{}\"", cmd_value(value)),
    }
}

/// One comment line per input line, so a newline cannot end the comment.
fn comment_lines(out: &mut String, marker: &str, value: &str) -> fmt::Result {
    for line in value.lines() {
        writeln!(out, "{} {}", marker, line)?;
    }
    Ok(())
}

fn cmd_echo_lines(out: &mut String, value: &str, redirect: &str) -> fmt::Result {
    for line in value.lines() {
        let mut escaped = String::with_capacity(line.len());
        for c in cmd_value(line).chars() {
            if matches!(c, '^' | '&' | '|' | '<' | '>' | '(' | ')') {
                escaped.push('^');
            }
            escaped.push(c);
        }
        writeln!(out, "echo({}{}", escaped, redirect)?;
    }
    Ok(())
}

/// Rewrite `$VAR` and `${VAR}` as `%VAR%`; literal `%` is doubled.
fn cmd_value(value: &str) -> String {
    substitute_vars(&value.replace('%', "%%"), |var| Some(format!("%{}%", var)))
}

/// Wrap in single quotes, which neither sh nor csh expands inside.
fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Escape text for a double-quoted shell word, leaving `$VAR` live.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Expand `$VAR` and `${VAR}` from `env`. Unknown variables are left as written.
fn expand_vars(text: &str, env: &BTreeMap<String, String>) -> String {
    substitute_vars(text, |var| env.get(var).cloned())
}

/// Replace every `$VAR` and `${VAR}` for which `lookup` has a value.
fn substitute_vars<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (var, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) if is_var_name(&braced[..end]) => (&braced[..end], end + 2),
                _ => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            if is_var_name(&after[..end]) {
                (&after[..end], end)
            } else {
                ("", 0)
            }
        };

        match lookup(var) {
            Some(value) if consumed > 0 => out.push_str(&value),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
