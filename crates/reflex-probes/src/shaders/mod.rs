//! Composable WGSL blocks
//!
//! Programs are assembled from named blocks that declare which symbols they
//! provide and require. Inserting a block under an existing name replaces it
//! in place, so applying the same block twice never duplicates code. Each
//! block is emitted between guard markers:
//!
//! ```wgsl
//! // >>> block:probe_math
//! ...
//! // <<< block:probe_math
//! ```

mod library;

pub use library::{program_composer, program_source, PREFILTER_SHADER};

use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};

use crate::{Error, Result};

/// Opening guard marker for `name`.
pub fn block_start_marker(name: &str) -> String {
    format!("// >>> block:{name}")
}

/// Closing guard marker for `name`.
pub fn block_end_marker(name: &str) -> String {
    format!("// <<< block:{name}")
}

/// A named piece of WGSL with declared dependencies.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderBlock {
    name: Cow<'static, str>,
    source: Cow<'static, str>,
    provides: Vec<Cow<'static, str>>,
    requires: Vec<Cow<'static, str>>,
}

impl ShaderBlock {
    pub fn new(name: impl Into<Cow<'static, str>>, source: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            provides: Vec::new(),
            requires: Vec::new(),
        }
    }

    pub fn provides(mut self, symbols: &[&'static str]) -> Self {
        self.provides.extend(symbols.iter().map(|s| Cow::Borrowed(*s)));
        self
    }

    pub fn requires(mut self, symbols: &[&'static str]) -> Self {
        self.requires.extend(symbols.iter().map(|s| Cow::Borrowed(*s)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn provided(&self) -> impl Iterator<Item = &str> {
        self.provides.iter().map(|s| s.as_ref())
    }

    pub fn required(&self) -> impl Iterator<Item = &str> {
        self.requires.iter().map(|s| s.as_ref())
    }
}

/// Ordered set of blocks keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ShaderComposer {
    blocks: Vec<ShaderBlock>,
}

impl ShaderComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `block`, replacing any block with the same name at its position.
    /// Returns the replaced block.
    pub fn insert(&mut self, block: ShaderBlock) -> Option<ShaderBlock> {
        match self.blocks.iter().position(|b| b.name == block.name) {
            Some(index) => {
                log::trace!("Replacing shader block '{}'", block.name);
                Some(std::mem::replace(&mut self.blocks[index], block))
            }
            None => {
                self.blocks.push(block);
                None
            }
        }
    }

    pub fn with(mut self, block: ShaderBlock) -> Self {
        self.insert(block);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<ShaderBlock> {
        let index = self.blocks.iter().position(|b| b.name == name)?;
        Some(self.blocks.remove(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blocks.iter().any(|b| b.name == name)
    }

    pub fn block(&self, name: &str) -> Option<&ShaderBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Block indices with providers before requirers, ties in insertion order.
    fn resolve_order(&self) -> Result<Vec<usize>> {
        let mut providers: HashMap<&str, usize> = HashMap::new();
        for (i, block) in self.blocks.iter().enumerate() {
            for symbol in block.provided() {
                if let Some(&other) = providers.get(symbol) {
                    return Err(Error::Shader(format!(
                        "symbol '{}' provided by both '{}' and '{}'",
                        symbol, self.blocks[other].name, block.name
                    )));
                }
                providers.insert(symbol, i);
            }
        }

        let mut in_degree = vec![0; self.blocks.len()];
        let mut adj_list: Vec<Vec<usize>> = vec![Vec::new(); self.blocks.len()];
        for (i, block) in self.blocks.iter().enumerate() {
            for symbol in block.required() {
                let provider = *providers.get(symbol).ok_or_else(|| {
                    Error::Shader(format!(
                        "block '{}' requires '{}' which no block provides",
                        block.name, symbol
                    ))
                })?;
                if provider != i {
                    adj_list[provider].push(i);
                    in_degree[i] += 1;
                }
            }
        }

        // Kahn's algorithm, FIFO so independent blocks keep insertion order
        let mut queue: VecDeque<usize> = (0..self.blocks.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.blocks.len());
        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &neighbor in &adj_list[node] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        if order.len() != self.blocks.len() {
            return Err(Error::Shader("cyclic dependency between shader blocks".into()));
        }
        Ok(order)
    }

    /// Concatenate every block between its guard markers.
    pub fn compose(&self) -> Result<String> {
        let order = self.resolve_order()?;
        let mut output = String::new();
        for index in order {
            let block = &self.blocks[index];
            output.push_str(&block_start_marker(&block.name));
            output.push('\n');
            output.push_str(block.source.trim_end());
            output.push('\n');
            output.push_str(&block_end_marker(&block.name));
            output.push_str("\n\n");
        }
        Ok(output)
    }
}

/// Parse and validate WGSL with naga, before it ever reaches the device.
pub fn validate_wgsl(label: &str, source: &str) -> Result<naga::Module> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|err| Error::Shader(format!("{}: {}", label, err.emit_to_string(source))))?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    )
    .validate(&module)
    .map_err(|err| Error::Shader(format!("{}: {:?}", label, err)))?;

    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn test_insert_replaces_by_name() {
        let mut composer = ShaderComposer::new()
            .with(ShaderBlock::new("a", "const A: u32 = 1u;").provides(&["A"]));
        let replaced = composer.insert(ShaderBlock::new("a", "const A: u32 = 2u;").provides(&["A"]));
        assert!(replaced.is_some());
        assert_eq!(composer.len(), 1);

        let source = composer.compose().unwrap();
        assert_eq!(count(&source, "// >>> block:a"), 1);
        assert!(source.contains("2u"));
        assert!(!source.contains("1u"));
    }

    #[test]
    fn test_reapplying_blocks_is_idempotent() {
        let block = ShaderBlock::new("math", "fn twice(x: f32) -> f32 { return x * 2.0; }").provides(&["twice"]);
        let once = ShaderComposer::new().with(block.clone()).compose().unwrap();
        let twice = ShaderComposer::new()
            .with(block.clone())
            .with(block)
            .compose()
            .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_providers_come_first() {
        let composer = ShaderComposer::new()
            .with(ShaderBlock::new("user", "fn user() -> f32 { return helper(); }").requires(&["helper"]))
            .with(ShaderBlock::new("unrelated", "const U: f32 = 0.0;"))
            .with(ShaderBlock::new("helper", "fn helper() -> f32 { return 1.0; }").provides(&["helper"]));
        let source = composer.compose().unwrap();
        let unrelated = source.find("block:unrelated").unwrap();
        let helper = source.find("block:helper").unwrap();
        let user = source.find("block:user").unwrap();
        assert!(unrelated < helper && helper < user);
        assert!(validate_wgsl("order", &source).is_ok());
    }

    #[test]
    fn test_missing_requirement_fails() {
        let composer = ShaderComposer::new().with(ShaderBlock::new("user", "").requires(&["nothing"]));
        assert!(matches!(composer.compose(), Err(Error::Shader(_))));
    }

    #[test]
    fn test_conflicting_providers_fail() {
        let composer = ShaderComposer::new()
            .with(ShaderBlock::new("one", "").provides(&["x"]))
            .with(ShaderBlock::new("two", "").provides(&["x"]));
        assert!(composer.compose().is_err());
    }

    #[test]
    fn test_cycle_fails() {
        let composer = ShaderComposer::new()
            .with(ShaderBlock::new("a", "").provides(&["a"]).requires(&["b"]))
            .with(ShaderBlock::new("b", "").provides(&["b"]).requires(&["a"]));
        assert!(composer.compose().is_err());
    }

    #[test]
    fn test_validate_reports_errors() {
        assert!(validate_wgsl("broken", "fn broken( {").is_err());
        assert!(validate_wgsl("types", "fn f() -> f32 { return 1u; }").is_err());
    }
}
