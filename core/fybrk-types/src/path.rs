//! Relative-path normalization for catalog keys.
//!
//! Catalog paths are forward-slash separated, rooted at the sync directory,
//! and must never escape it. The reserved `.fybrk` subtree is excluded from
//! sync entirely.

use std::path::{Component, Path};

use crate::{TypesError, TypesResult};

/// Name of the reserved subdirectory holding the catalog and key.
pub const RESERVED_DIR: &str = ".fybrk";

/// Normalize a relative path into catalog form.
///
/// Rejects absolute paths, `..` components, and anything under the
/// reserved directory.
pub fn normalize_rel_path(rel: &Path) -> TypesResult<String> {
    let mut parts: Vec<&str> = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| TypesError::UnsafePath(rel.display().to_string()))?;
                if part == RESERVED_DIR {
                    return Err(TypesError::UnsafePath(rel.display().to_string()));
                }
                parts.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(TypesError::UnsafePath(rel.display().to_string()));
            }
        }
    }
    if parts.is_empty() {
        return Err(TypesError::UnsafePath(rel.display().to_string()));
    }
    Ok(parts.join("/"))
}

/// Compute the catalog-form path of `abs` under `root`, or `None` when the
/// path lies outside the root or inside the reserved directory.
pub fn relative_to_root(root: &Path, abs: &Path) -> Option<String> {
    let rel = abs.strip_prefix(root).ok()?;
    normalize_rel_path(rel).ok()
}
