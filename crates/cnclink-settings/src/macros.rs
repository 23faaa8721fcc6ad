//! Macro library
//!
//! Named, reusable G-code snippets kept in a [`MacroStore`]. A line consisting
//! of `@name` inside a macro is replaced by the lines of the macro with that
//! name when the macro is expanded for sending.

use crate::error::{MacroError, MacroResult};
use chrono::{DateTime, Utc};
use cnclink_communication::firmware::grbl::utils::strip_comments;
use cnclink_core::GcodeError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Deepest allowed chain of nested references
pub const MAX_MACRO_DEPTH: usize = 8;

/// A stored macro
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    pub id: String,
    pub name: String,
    pub gcode: String,
    #[serde(default)]
    pub shortcut: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub built_in: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Macro {
    /// A user macro with a fresh id
    pub fn new(name: impl Into<String>, gcode: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            gcode: gcode.into(),
            shortcut: None,
            sort_order: 0,
            built_in: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sendable lines, references unexpanded
    pub fn lines(&self) -> Vec<String> {
        MacroManager::parse_lines(&self.gcode)
    }
}

/// Persistence contract behind [`MacroManager`]
///
/// Each method either applies completely or leaves the store unchanged.
pub trait MacroStore: Send {
    /// Every stored macro, in storage order
    fn load_all(&self) -> MacroResult<Vec<Macro>>;

    /// Add a macro
    fn insert(&mut self, item: Macro) -> MacroResult<()>;

    /// Replace the macro with the same id; `NotFound` when absent
    fn update(&mut self, item: Macro) -> MacroResult<()>;

    /// Remove by id; `NotFound` when absent
    fn delete(&mut self, id: &str) -> MacroResult<()>;

    /// Replace the whole collection at once
    fn replace_all(&mut self, items: Vec<Macro>) -> MacroResult<()>;
}

/// Store held in memory only
#[derive(Debug, Clone, Default)]
pub struct InMemoryMacroStore {
    items: Vec<Macro>,
}

impl InMemoryMacroStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MacroStore for InMemoryMacroStore {
    fn load_all(&self) -> MacroResult<Vec<Macro>> {
        Ok(self.items.clone())
    }

    fn insert(&mut self, item: Macro) -> MacroResult<()> {
        self.items.push(item);
        Ok(())
    }

    fn update(&mut self, item: Macro) -> MacroResult<()> {
        let slot = self
            .items
            .iter_mut()
            .find(|m| m.id == item.id)
            .ok_or_else(|| MacroError::NotFound(item.id.clone()))?;
        *slot = item;
        Ok(())
    }

    fn delete(&mut self, id: &str) -> MacroResult<()> {
        let position = self
            .items
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| MacroError::NotFound(id.to_string()))?;
        self.items.remove(position);
        Ok(())
    }

    fn replace_all(&mut self, items: Vec<Macro>) -> MacroResult<()> {
        self.items = items;
        Ok(())
    }
}

/// Store persisted as one JSON array
///
/// Every change rewrites the file through a temporary sibling and a rename.
#[derive(Debug)]
pub struct JsonFileMacroStore {
    path: PathBuf,
    items: Vec<Macro>,
}

impl JsonFileMacroStore {
    /// Open `path`; a missing file is an empty store
    pub fn open(path: impl Into<PathBuf>) -> MacroResult<Self> {
        let path = path.into();
        let items = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            Vec::new()
        };
        tracing::debug!("Opened macro store {} ({} macros)", path.display(), items.len());
        Ok(Self { path, items })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&mut self, items: Vec<Macro>) -> MacroResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&items)?;
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, content)?;
        std::fs::rename(&staging, &self.path)?;
        self.items = items;
        Ok(())
    }
}

impl MacroStore for JsonFileMacroStore {
    fn load_all(&self) -> MacroResult<Vec<Macro>> {
        Ok(self.items.clone())
    }

    fn insert(&mut self, item: Macro) -> MacroResult<()> {
        let mut items = self.items.clone();
        items.push(item);
        self.commit(items)
    }

    fn update(&mut self, item: Macro) -> MacroResult<()> {
        let mut items = self.items.clone();
        let slot = items
            .iter_mut()
            .find(|m| m.id == item.id)
            .ok_or_else(|| MacroError::NotFound(item.id.clone()))?;
        *slot = item;
        self.commit(items)
    }

    fn delete(&mut self, id: &str) -> MacroResult<()> {
        if !self.items.iter().any(|m| m.id == id) {
            return Err(MacroError::NotFound(id.to_string()));
        }
        let items = self.items.iter().filter(|m| m.id != id).cloned().collect();
        self.commit(items)
    }

    fn replace_all(&mut self, items: Vec<Macro>) -> MacroResult<()> {
        self.commit(items)
    }
}

const BUILT_INS: &[(&str, &str, &str)] = &[
    ("builtin-home", "home", "$H"),
    ("builtin-unlock", "unlock", "$X"),
    ("builtin-work-zero", "work_zero", "G90 G0 Z5\nG0 X0 Y0"),
    ("builtin-zero-xy", "zero_xy", "G10 L20 P1 X0 Y0"),
    ("builtin-park", "park", "G53 G0 Z-1\nG53 G0 X-5 Y-5"),
];

/// CRUD and expansion over a [`MacroStore`]
pub struct MacroManager {
    store: Box<dyn MacroStore>,
}

impl MacroManager {
    pub fn new(store: impl MacroStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Manager over an empty in-memory store
    pub fn in_memory() -> Self {
        Self::new(InMemoryMacroStore::new())
    }

    /// Manager over a JSON file
    pub fn open_file(path: impl Into<PathBuf>) -> MacroResult<Self> {
        Ok(Self::new(JsonFileMacroStore::open(path)?))
    }

    /// All macros by sort order, then name
    pub fn list(&self) -> MacroResult<Vec<Macro>> {
        let mut items = self.store.load_all()?;
        items.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(items)
    }

    pub fn get(&self, id: &str) -> MacroResult<Option<Macro>> {
        Ok(self.store.load_all()?.into_iter().find(|m| m.id == id))
    }

    /// Case-insensitive name lookup
    pub fn find_by_name(&self, name: &str) -> MacroResult<Option<Macro>> {
        let name = name.trim();
        Ok(self
            .store
            .load_all()?
            .into_iter()
            .find(|m| m.name.eq_ignore_ascii_case(name)))
    }

    /// Add a user macro at the end of the list
    pub fn create(
        &mut self,
        name: &str,
        gcode: &str,
        shortcut: Option<String>,
    ) -> MacroResult<Macro> {
        let existing = self.store.load_all()?;
        let name = validate_name(name)?;
        ensure_unique(&existing, &name, None)?;

        let mut item = Macro::new(name, gcode);
        item.shortcut = shortcut;
        item.sort_order = next_sort_order(&existing);
        self.store.insert(item.clone())?;
        tracing::info!("Created macro '{}'", item.name);
        Ok(item)
    }

    /// Save edits to name, G-code, shortcut and order
    ///
    /// Identity, creation time and the built-in flag are kept from the stored
    /// macro.
    pub fn update(&mut self, item: &Macro) -> MacroResult<Macro> {
        let existing = self.store.load_all()?;
        let stored = existing
            .iter()
            .find(|m| m.id == item.id)
            .ok_or_else(|| MacroError::NotFound(item.id.clone()))?;
        let name = validate_name(&item.name)?;
        ensure_unique(&existing, &name, Some(&item.id))?;

        let updated = Macro {
            id: stored.id.clone(),
            name,
            gcode: item.gcode.clone(),
            shortcut: item.shortcut.clone(),
            sort_order: item.sort_order,
            built_in: stored.built_in,
            created_at: stored.created_at,
            updated_at: Utc::now(),
        };
        self.store.update(updated.clone())?;
        Ok(updated)
    }

    /// Remove a user macro; built-ins are refused without touching the store
    pub fn delete_macro(&mut self, id: &str) -> MacroResult<()> {
        let item = self
            .get(id)?
            .ok_or_else(|| MacroError::NotFound(id.to_string()))?;
        if item.built_in {
            return Err(MacroError::BuiltInProtected(item.name));
        }
        self.store.delete(id)?;
        tracing::info!("Deleted macro '{}'", item.name);
        Ok(())
    }

    /// Give `ids` sort orders 0, 1, 2, ... in one store write
    ///
    /// Macros not listed keep their relative order after the listed ones.
    /// Unknown or repeated ids fail without changing anything.
    pub fn reorder(&mut self, ids: &[String]) -> MacroResult<()> {
        let current = self.list()?;
        for (i, id) in ids.iter().enumerate() {
            if !current.iter().any(|m| &m.id == id) {
                return Err(MacroError::NotFound(id.clone()));
            }
            if ids[..i].contains(id) {
                return Err(MacroError::InvalidMacro(format!(
                    "id {} listed twice in reorder",
                    id
                )));
            }
        }

        let mut ordered: Vec<Macro> = ids
            .iter()
            .filter_map(|id| current.iter().find(|m| &m.id == id).cloned())
            .collect();
        ordered.extend(current.into_iter().filter(|m| !ids.contains(&m.id)));
        for (order, item) in ordered.iter_mut().enumerate() {
            item.sort_order = order as i32;
        }
        self.store.replace_all(ordered)
    }

    /// Sendable lines of a G-code snippet: comments removed, blanks dropped
    pub fn parse_lines(gcode: &str) -> Vec<String> {
        gcode
            .lines()
            .map(|line| strip_comments(line).trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Seed the built-in macros unless any built-in is already stored
    ///
    /// Returns how many were added.
    pub fn ensure_built_ins(&mut self) -> MacroResult<usize> {
        let existing = self.store.load_all()?;
        if existing.iter().any(|m| m.built_in) {
            return Ok(0);
        }

        let mut order = next_sort_order(&existing);
        let now = Utc::now();
        let mut items = existing;
        for (id, name, gcode) in BUILT_INS {
            items.push(Macro {
                id: id.to_string(),
                name: name.to_string(),
                gcode: gcode.to_string(),
                shortcut: None,
                sort_order: order,
                built_in: true,
                created_at: now,
                updated_at: now,
            });
            order += 1;
        }
        self.store.replace_all(items)?;
        tracing::info!("Seeded {} built-in macros", BUILT_INS.len());
        Ok(BUILT_INS.len())
    }

    /// Lines of macro `id` with every `@name` reference replaced, recursively
    pub fn expand_lines(&self, id: &str) -> MacroResult<Vec<String>> {
        let items = self.store.load_all()?;
        let root = items
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| MacroError::NotFound(id.to_string()))?;

        let mut chain = vec![root];
        let mut lines = Vec::new();
        expand_into(&items, &mut chain, &mut lines)?;
        tracing::debug!("Expanded macro '{}' to {} lines", root.name, lines.len());
        Ok(lines)
    }

    /// [`expand_lines`](Self::expand_lines) by macro name
    pub fn expand_by_name(&self, name: &str) -> MacroResult<Vec<String>> {
        let item = self
            .find_by_name(name)?
            .ok_or_else(|| MacroError::NotFound(name.to_string()))?;
        self.expand_lines(&item.id)
    }
}

fn expand_into<'a>(
    items: &'a [Macro],
    chain: &mut Vec<&'a Macro>,
    out: &mut Vec<String>,
) -> MacroResult<()> {
    let Some(current) = chain.last().copied() else {
        return Ok(());
    };
    for line in current.lines() {
        let Some(name) = reference_name(&line) else {
            out.push(line);
            continue;
        };
        let target = items
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| GcodeError::UnknownMacro {
                name: name.to_string(),
            })?;
        if chain.iter().any(|m| m.id == target.id) {
            let names: Vec<&str> = chain
                .iter()
                .map(|m| m.name.as_str())
                .chain(std::iter::once(target.name.as_str()))
                .collect();
            return Err(GcodeError::MacroCycle {
                chain: names.join(" -> "),
            }
            .into());
        }
        if chain.len() > MAX_MACRO_DEPTH {
            return Err(GcodeError::MacroDepthExceeded {
                max_depth: MAX_MACRO_DEPTH,
            }
            .into());
        }
        chain.push(target);
        expand_into(items, chain, out)?;
        chain.pop();
    }
    Ok(())
}

/// `@name` lines name another macro
fn reference_name(line: &str) -> Option<&str> {
    let name = line.trim().strip_prefix('@')?.trim();
    (!name.is_empty()).then_some(name)
}

fn validate_name(name: &str) -> MacroResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(MacroError::InvalidMacro("name is empty".to_string()));
    }
    if name.starts_with('@') {
        return Err(MacroError::InvalidMacro(
            "name cannot start with '@'".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn ensure_unique(existing: &[Macro], name: &str, except: Option<&str>) -> MacroResult<()> {
    let taken = existing
        .iter()
        .any(|m| m.name.eq_ignore_ascii_case(name) && Some(m.id.as_str()) != except);
    if taken {
        return Err(MacroError::DuplicateName(name.to_string()));
    }
    Ok(())
}

fn next_sort_order(existing: &[Macro]) -> i32 {
    existing
        .iter()
        .map(|m| m.sort_order + 1)
        .max()
        .unwrap_or(0)
}
