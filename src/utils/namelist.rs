/*
Copyright 2021 - 2022 Jakub Lewandowski

This file is part of benchcab.

benchcab is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

benchcab is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with benchcab. If not, see https://www.gnu.org/licenses/.
*/

//! Module responsible for reading, patching and writing
//! Fortran namelist files (such as `cable.nml`).
//!
//! A namelist is represented as a tree: top-level groups (`&cable ... /`)
//! map parameter names to values, and derived-type members
//! (`cable_user%gs_switch`) are nested groups. The same tree type is
//! deserialized from `config.yaml` for science configurations and
//! realisation patches, so patches can be merged directly into namelists.
//!
//! Like Fortran itself, parameter names are case-insensitive and are
//! stored lower-cased.

use crate::errors::NamelistError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{fmt::Write as _, fs, path::Path};

/// Ordered mapping of parameter names to namelist nodes.
pub type NmlTree = IndexMap<String, NmlNode>;

/// Single node of the namelist tree.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NmlNode {
    Group(NmlTree),
    Value(NmlValue),
}

/// Value of a namelist parameter.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NmlValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<NmlValue>),
}

impl NmlValue {
    /// Representation of the value in namelist syntax.
    pub fn to_fortran(&self) -> String {
        match self {
            NmlValue::Bool(true) => ".true.".to_string(),
            NmlValue::Bool(false) => ".false.".to_string(),
            NmlValue::Int(val) => val.to_string(),
            NmlValue::Float(val) => format_real(*val),
            NmlValue::Str(val) => format!("'{}'", val.replace('\'', "''")),
            NmlValue::List(vals) => vals
                .iter()
                .map(NmlValue::to_fortran)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Reals always carry a decimal point or an exponent,
/// so they are not read back as integers.
fn format_real(val: f64) -> String {
    if !val.is_finite() || val.fract() != 0.0 {
        val.to_string()
    } else if val.abs() < 1e16 {
        format!("{:.1}", val)
    } else {
        format!("{:e}", val)
    }
}

/// Convenience constructor of leaf nodes.
impl From<NmlValue> for NmlNode {
    fn from(value: NmlValue) -> Self {
        NmlNode::Value(value)
    }
}

/// Reads a namelist file into a tree.
pub fn read(path: &Path) -> Result<NmlTree, NamelistError> {
    let text = fs::read_to_string(path)?;
    parse(&text)
}

/// Writes a namelist tree to a file, overwriting it.
pub fn write(path: &Path, nml: &NmlTree) -> Result<(), NamelistError> {
    let text = render(nml)?;
    fs::write(path, text)?;
    Ok(())
}

/// Merges `patch` into the namelist at `nml_path`.
///
/// The file is created when it does not exist.
pub fn patch_namelist(nml_path: &Path, patch: &NmlTree) -> Result<(), NamelistError> {
    if !nml_path.exists() {
        let mut nml = NmlTree::new();
        deep_update(&mut nml, patch);
        return write(nml_path, &nml);
    }

    let mut nml = read(nml_path)?;
    deep_update(&mut nml, patch);
    write(nml_path, &nml)
}

/// Removes parameters listed in `patch_remove` from the namelist at `nml_path`.
///
/// Fails without touching the file when any of the parameters does not exist.
pub fn patch_remove_namelist(
    nml_path: &Path,
    patch_remove: &NmlTree,
) -> Result<(), NamelistError> {
    let mut nml = read(nml_path)?;

    if let Err(key) = deep_del(&mut nml, patch_remove, "") {
        let file = nml_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Err(NamelistError::MissingKey { key, file });
    }

    write(nml_path, &nml)
}

/// Recursively merges `patch` into `base`.
///
/// Groups present in both trees are merged, any other node
/// in `patch` replaces the node in `base`.
pub fn deep_update(base: &mut NmlTree, patch: &NmlTree) {
    for (key, node) in patch {
        let key = key.to_lowercase();

        match (base.get_mut(&key), node) {
            (Some(NmlNode::Group(base_group)), NmlNode::Group(patch_group)) => {
                deep_update(base_group, patch_group);
            }
            _ => {
                base.insert(key, lowercase_keys(node));
            }
        }
    }
}

/// Recursively deletes leaves of `patch` from `base`.
///
/// Returns the `%`-separated path of the first parameter
/// that does not exist in `base`.
pub fn deep_del(base: &mut NmlTree, patch: &NmlTree, prefix: &str) -> Result<(), String> {
    for (key, node) in patch {
        let key = key.to_lowercase();
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}%{}", prefix, key)
        };

        match (base.get_mut(&key), node) {
            (None, _) => return Err(path),
            (Some(NmlNode::Group(base_group)), NmlNode::Group(patch_group)) => {
                deep_del(base_group, patch_group, &path)?;
            }
            (Some(_), _) => {
                base.shift_remove(&key);
            }
        }
    }

    Ok(())
}

/// Flattens nested groups into `delimiter`-joined parameter names.
pub fn flatten(tree: &NmlTree, delimiter: &str) -> Vec<(String, NmlValue)> {
    let mut flat = vec![];
    flatten_into(tree, delimiter, "", &mut flat);
    flat
}

fn flatten_into(
    tree: &NmlTree,
    delimiter: &str,
    prefix: &str,
    flat: &mut Vec<(String, NmlValue)>,
) {
    for (key, node) in tree {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}{}{}", prefix, delimiter, key)
        };

        match node {
            NmlNode::Group(group) => flatten_into(group, delimiter, &name, flat),
            NmlNode::Value(value) => flat.push((name, value.clone())),
        }
    }
}

fn lowercase_keys(node: &NmlNode) -> NmlNode {
    match node {
        NmlNode::Group(group) => NmlNode::Group(
            group
                .iter()
                .map(|(k, v)| (k.to_lowercase(), lowercase_keys(v)))
                .collect(),
        ),
        NmlNode::Value(value) => NmlNode::Value(value.clone()),
    }
}

/// Renders the namelist tree in namelist syntax.
pub fn render(nml: &NmlTree) -> Result<String, NamelistError> {
    let mut text = String::new();

    for (index, (name, node)) in nml.iter().enumerate() {
        let group = match node {
            NmlNode::Group(group) => group,
            NmlNode::Value(_) => return Err(NamelistError::NotAGroup(name.clone())),
        };

        if index > 0 {
            text.push('\n');
        }

        let _ = writeln!(text, "&{}", name);
        for (key, value) in flatten(group, "%") {
            let _ = writeln!(text, "    {} = {}", key, value.to_fortran());
        }
        text.push_str("/\n");
    }

    Ok(text)
}

/// Lexical token of a namelist value.
#[derive(Clone, PartialEq, Debug)]
enum Token {
    Quoted(String),
    Bare(String),
}

/// Parses namelist text into a tree.
pub fn parse(text: &str) -> Result<NmlTree, NamelistError> {
    let mut nml = NmlTree::new();
    let mut current: Option<(String, NmlTree)> = None;
    let mut last_key: Option<String> = None;

    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = strip_comment(raw_line);
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('&') {
            let name = header.split_whitespace().next().unwrap_or("").to_lowercase();

            match current.take() {
                Some(group) if name == "end" => {
                    insert_group(&mut nml, group);
                }
                Some(_) => {
                    return Err(NamelistError::Syntax(
                        line_no,
                        format!("group '{}' opened before previous group was closed", name),
                    ))
                }
                None if name.is_empty() => {
                    return Err(NamelistError::Syntax(line_no, "missing group name".into()))
                }
                None => {
                    let closes = header.trim_end().ends_with('/');
                    if closes {
                        insert_group(&mut nml, (name, NmlTree::new()));
                    } else {
                        current = Some((name, NmlTree::new()));
                    }
                }
            }
            last_key = None;
            continue;
        }

        if line == "/" {
            match current.take() {
                Some(group) => insert_group(&mut nml, group),
                None => return Err(NamelistError::Syntax(line_no, "unexpected '/'".into())),
            }
            last_key = None;
            continue;
        }

        let group = match current.as_mut() {
            Some((_, group)) => group,
            None => {
                return Err(NamelistError::Syntax(
                    line_no,
                    "parameter outside of a group".into(),
                ))
            }
        };

        let (key, value_text) = match line.split_once('=') {
            Some((key, value)) => (Some(key.trim().to_lowercase()), value),
            None => (None, line),
        };

        let (tokens, closes) =
            tokenize(value_text).map_err(|msg| NamelistError::Syntax(line_no, msg))?;
        let mut values = tokens.into_iter().map(token_value).collect::<Vec<_>>();

        match (key, &last_key) {
            (Some(key), _) => {
                if key.is_empty() {
                    return Err(NamelistError::Syntax(line_no, "missing parameter name".into()));
                }
                let value = match values.len() {
                    0 => NmlValue::Str(String::new()),
                    1 => values.remove(0),
                    _ => NmlValue::List(values),
                };
                insert_value(group, &key, value)
                    .map_err(|msg| NamelistError::Syntax(line_no, msg))?;
                last_key = Some(key);
            }
            (None, Some(key)) => {
                append_values(group, key, values);
            }
            (None, None) => {
                return Err(NamelistError::Syntax(
                    line_no,
                    format!("cannot interpret '{}'", line),
                ))
            }
        }

        if closes {
            if let Some(group) = current.take() {
                insert_group(&mut nml, group);
            }
            last_key = None;
        }
    }

    if let Some((name, _)) = current {
        return Err(NamelistError::Syntax(
            text.lines().count(),
            format!("group '{}' is not terminated", name),
        ));
    }

    Ok(nml)
}

fn insert_group(nml: &mut NmlTree, (name, group): (String, NmlTree)) {
    match nml.get_mut(&name) {
        Some(NmlNode::Group(existing)) => deep_update(existing, &group),
        _ => {
            nml.insert(name, NmlNode::Group(group));
        }
    }
}

/// Inserts value under `%`-separated key, creating derived-type groups.
fn insert_value(group: &mut NmlTree, key: &str, value: NmlValue) -> Result<(), String> {
    let mut parts = key.split('%').map(str::trim).collect::<Vec<_>>();
    let leaf = parts.pop().unwrap_or_default();
    let mut node = group;

    for part in parts {
        let entry = node
            .entry(part.to_string())
            .or_insert_with(|| NmlNode::Group(NmlTree::new()));

        node = match entry {
            NmlNode::Group(inner) => inner,
            NmlNode::Value(_) => {
                return Err(format!("'{}' is both a value and a derived type", part))
            }
        };
    }

    node.insert(leaf.to_string(), NmlNode::Value(value));
    Ok(())
}

/// Appends continuation-line values to the parameter under `key`.
fn append_values(group: &mut NmlTree, key: &str, values: Vec<NmlValue>) {
    if values.is_empty() {
        return;
    }

    let mut node = Some(group);
    let parts = key.split('%').map(str::trim).collect::<Vec<_>>();
    let (leaf, path) = match parts.split_last() {
        Some(split) => split,
        None => return,
    };

    for part in path {
        node = match node.and_then(|n| n.get_mut(*part)) {
            Some(NmlNode::Group(inner)) => Some(inner),
            _ => None,
        };
    }

    if let Some(NmlNode::Value(existing)) = node.and_then(|n| n.get_mut(*leaf)) {
        let mut list = match std::mem::replace(existing, NmlValue::List(vec![])) {
            NmlValue::List(list) => list,
            single => vec![single],
        };
        list.extend(values);
        *existing = NmlValue::List(list);
    }
}

/// Removes `!` comment from the line, ignoring `!` inside strings.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;

    for (pos, ch) in line.char_indices() {
        match (quote, ch) {
            (None, '\'') | (None, '"') => quote = Some(ch),
            (Some(q), c) if c == q => quote = None,
            (None, '!') => return &line[..pos],
            _ => (),
        }
    }

    line
}

/// Splits the value part of a line into tokens.
///
/// Also reports whether the line ends with a group terminator `/`.
fn tokenize(text: &str) -> Result<(Vec<Token>, bool), String> {
    let mut tokens = vec![];
    let mut closes = false;
    let mut chars = text.chars().peekable();
    let mut bare = String::new();

    fn flush(bare: &mut String, tokens: &mut Vec<Token>) {
        if !bare.is_empty() {
            tokens.push(Token::Bare(std::mem::take(bare)));
        }
    }

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' => {
                flush(&mut bare, &mut tokens);
                let mut string = String::new();
                let mut terminated = false;

                while let Some(inner) = chars.next() {
                    if inner == ch {
                        // doubled quote is an escaped quote
                        if chars.peek() == Some(&ch) {
                            chars.next();
                            string.push(ch);
                        } else {
                            terminated = true;
                            break;
                        }
                    } else {
                        string.push(inner);
                    }
                }

                if !terminated {
                    return Err("unterminated string".into());
                }
                tokens.push(Token::Quoted(string));
            }
            ',' => flush(&mut bare, &mut tokens),
            c if c.is_whitespace() => flush(&mut bare, &mut tokens),
            '/' if bare.is_empty() && chars.clone().all(char::is_whitespace) => {
                closes = true;
            }
            c => bare.push(c),
        }
    }
    flush(&mut bare, &mut tokens);

    Ok((tokens, closes))
}

fn token_value(token: Token) -> NmlValue {
    match token {
        Token::Quoted(string) => NmlValue::Str(string),
        Token::Bare(bare) => bare_value(&bare),
    }
}

fn bare_value(bare: &str) -> NmlValue {
    let lower = bare.to_lowercase();

    match lower.as_str() {
        ".true." | ".t." | "t" => return NmlValue::Bool(true),
        ".false." | ".f." | "f" => return NmlValue::Bool(false),
        _ => (),
    }

    // repeat counts, e.g. `3*0.0`
    if let Some((count, item)) = bare.split_once('*') {
        if let Ok(count) = count.parse::<usize>() {
            return NmlValue::List(vec![bare_value(item); count]);
        }
    }

    if let Ok(int) = lower.parse::<i64>() {
        return NmlValue::Int(int);
    }

    if let Ok(real) = lower.replace('d', "e").parse::<f64>() {
        if !lower.contains("inf") && !lower.contains("nan") {
            return NmlValue::Float(real);
        }
    }

    NmlValue::Str(bare.to_string())
}
