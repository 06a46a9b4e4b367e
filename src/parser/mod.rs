//! Parsing of Paradox script files (states, strategic regions, supply
//! areas, country tags, terrain) into generic [ScriptMap] blocks on top of
//! [jomini]. The map loaders consume those blocks; nothing in here knows
//! what a state or a province is.

mod script;
pub use script::{
    ConversionError, ScriptArray, ScriptBlock, ScriptMap, ScriptObject, ScriptValue,
};

use std::{fmt, fs, io, path::Path, sync::Arc};

use jomini::{text::Operator, TextTape, TextToken};

use super::types::{GameString, HashMap};

/// An error that occurred while parsing a script file.
#[derive(Debug)]
pub enum ParsingError {
    /// The tokenizer rejected the input
    Syntax(jomini::Error),
    /// The file could not be read
    Io(io::Error),
    /// A token was in some way unexpected
    UnexpectedToken(usize, &'static str),
    /// A `@constant` reference has no definition
    UndefinedConstant(String),
    /// `@constant` definitions reference each other in a loop
    ConstantCycle(String),
}

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(e) => write!(f, "syntax error: {}", e),
            Self::Io(e) => write!(f, "could not read file: {}", e),
            Self::UnexpectedToken(pos, desc) => {
                write!(f, "token at {} is unexpected: {}", pos, desc)
            }
            Self::UndefinedConstant(name) => write!(f, "constant {} is not defined", name),
            Self::ConstantCycle(name) => {
                write!(f, "constant {} participates in a definition cycle", name)
            }
        }
    }
}

impl From<jomini::Error> for ParsingError {
    fn from(e: jomini::Error) -> Self {
        ParsingError::Syntax(e)
    }
}

impl From<io::Error> for ParsingError {
    fn from(e: io::Error) -> Self {
        ParsingError::Io(e)
    }
}

impl std::error::Error for ParsingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Syntax(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// A frame of the block stack during the token walk.
enum Frame {
    /// A keyed block plus the key awaiting its value, if any
    Map(ScriptMap, Option<String>),
    Array(ScriptArray),
}

/// Parses an entire script file into a root map named `name`.
/// `@constant` definitions are resolved and stripped from the result.
pub fn parse_script(content: &[u8], name: &str) -> Result<ScriptMap, ParsingError> {
    // game files frequently carry a UTF-8 BOM
    let content = content.strip_prefix(b"\xef\xbb\xbf").unwrap_or(content);
    let tape = TextTape::from_slice(content)?;
    let tokens = tape.tokens();
    let mut stack = vec![Frame::Map(ScriptMap::from_name(name.to_owned()), None)];
    for (offset, token) in tokens.iter().enumerate() {
        match token {
            TextToken::Object { .. } | TextToken::Array { .. } => {
                let block_name = match stack.last_mut() {
                    Some(Frame::Map(_, pending)) => pending.take().unwrap_or_default(),
                    _ => String::new(),
                };
                if matches!(token, TextToken::Object { .. }) {
                    stack.push(Frame::Map(ScriptMap::from_name(block_name), None));
                } else {
                    stack.push(Frame::Array(ScriptArray::from_name(block_name)));
                }
            }
            TextToken::End(_) => {
                if stack.len() <= 1 {
                    return Err(ParsingError::UnexpectedToken(offset, "unmatched closing brace"));
                }
                let (block_name, obj) = match stack.pop() {
                    Some(Frame::Map(m, pending)) => {
                        if pending.is_some() {
                            return Err(ParsingError::UnexpectedToken(
                                offset,
                                "key without a value at end of block",
                            ));
                        }
                        (m.name().to_owned(), ScriptObject::Map(m))
                    }
                    Some(Frame::Array(a)) => (a.name().to_owned(), ScriptObject::Array(a)),
                    None => unreachable!(),
                };
                match stack.last_mut() {
                    Some(Frame::Map(m, _)) => m.insert(block_name, ScriptValue::Object(obj)),
                    Some(Frame::Array(a)) => a.push(ScriptValue::Object(obj)),
                    None => unreachable!(),
                }
            }
            TextToken::Quoted(s) | TextToken::Unquoted(s) => {
                let text = s.to_string();
                match stack.last_mut() {
                    Some(Frame::Array(a)) => {
                        a.push(ScriptValue::String(Arc::from(text.as_str())))
                    }
                    Some(Frame::Map(m, pending)) => {
                        if let Some(key) = pending.take() {
                            m.insert(key, ScriptValue::String(Arc::from(text.as_str())));
                        } else {
                            *pending = Some(text);
                        }
                    }
                    None => unreachable!(),
                }
            }
            TextToken::Operator(op) => {
                if *op != Operator::Equal {
                    return Err(ParsingError::UnexpectedToken(
                        offset,
                        "encountered non = operator",
                    ));
                }
            }
            // e.g. `color = rgb { ... }`, the rgb tag adds nothing here
            TextToken::Header(_) => {}
            TextToken::MixedContainer
            | TextToken::Parameter(_)
            | TextToken::UndefinedParameter(_) => {
                return Err(ParsingError::UnexpectedToken(
                    offset,
                    "mixed container syntax does not appear in map files",
                ));
            }
        }
    }
    let mut root = match stack.pop() {
        Some(Frame::Map(m, None)) if stack.is_empty() => m,
        Some(Frame::Map(_, Some(_))) => {
            return Err(ParsingError::UnexpectedToken(
                tokens.len(),
                "key without a value at end of file",
            ))
        }
        _ => {
            return Err(ParsingError::UnexpectedToken(
                tokens.len(),
                "unclosed block at end of file",
            ))
        }
    };
    resolve_constants(&mut root)?;
    Ok(root)
}

/// Reads and parses a script file. The root block is named after the file
/// stem so loaders can report which file an entity came from.
pub fn parse_script_file<P: AsRef<Path>>(path: P) -> Result<ScriptMap, ParsingError> {
    let path = path.as_ref();
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content = fs::read(path)?;
    parse_script(&content, &name)
}

/// Resolves `@constant` definitions: top level `@key = value` entries are
/// removed from the map and every `@key` reference in the tree is replaced
/// with the final scalar. Chains are followed; a loop among definitions is
/// a hard error rather than a livelock.
fn resolve_constants(root: &mut ScriptMap) -> Result<(), ParsingError> {
    let const_keys: Vec<String> = root
        .keys()
        .filter(|k| k.starts_with('@'))
        .cloned()
        .collect();
    if const_keys.is_empty() {
        // the common case: nothing to substitute, so don't walk the tree
        return Ok(());
    }
    let mut raw: HashMap<String, GameString> = HashMap::default();
    for key in const_keys {
        if let Some(val) = root.remove(&key) {
            raw.insert(key.clone(), val.as_string().map_err(|_| {
                ParsingError::UnexpectedToken(0, "constant defined as a block")
            })?);
        }
    }
    let mut resolved: HashMap<String, GameString> = HashMap::default();
    for key in raw.keys() {
        let mut chain = vec![key.clone()];
        let mut current = key.clone();
        loop {
            let val = raw
                .get(&current)
                .ok_or_else(|| ParsingError::UndefinedConstant(current.clone()))?;
            if let Some(next) = val.strip_prefix('@') {
                let next = format!("@{}", next);
                if chain.contains(&next) {
                    return Err(ParsingError::ConstantCycle(key.clone()));
                }
                chain.push(next.clone());
                current = next;
            } else {
                resolved.insert(key.clone(), val.clone());
                break;
            }
        }
    }
    substitute_map(root, &resolved)
}

fn substitute_map(
    map: &mut ScriptMap,
    consts: &HashMap<String, GameString>,
) -> Result<(), ParsingError> {
    for val in map.values_mut() {
        substitute_value(val, consts)?;
    }
    Ok(())
}

fn substitute_value(
    value: &mut ScriptValue,
    consts: &HashMap<String, GameString>,
) -> Result<(), ParsingError> {
    match value {
        ScriptValue::String(s) => {
            if s.starts_with('@') {
                let replacement = consts
                    .get(s.as_ref())
                    .ok_or_else(|| ParsingError::UndefinedConstant(s.to_string()))?;
                *s = replacement.clone();
            }
        }
        ScriptValue::Object(ScriptObject::Map(m)) => substitute_map(m, consts)?,
        ScriptValue::Object(ScriptObject::Array(a)) => {
            for val in a.values_mut() {
                substitute_value(val, consts)?;
            }
        }
    }
    Ok(())
}
