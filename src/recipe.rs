// src/recipe.rs - Layer -> material recipe parsing and bookkeeping
//
// Recipe text format: "A,50:B,120:C,200" - material,layer pairs joined by
// ':'. Malformed entries are skipped individually with a logged reason so
// one bad pair does not reject the whole file.
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("IO error reading recipe: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid material '{0}' (expected A, B, C or D)")]
    InvalidMaterial(String),
}

/// One of the fixed material reservoirs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Material {
    A,
    B,
    C,
    D,
}

impl Material {
    /// Configuration key of the fill pump feeding this material.
    pub fn pump_key(&self) -> &'static str {
        match self {
            Material::A => "a",
            Material::B => "b",
            Material::C => "c",
            Material::D => "d",
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Material::A => write!(f, "A"),
            Material::B => write!(f, "B"),
            Material::C => write!(f, "C"),
            Material::D => write!(f, "D"),
        }
    }
}

impl FromStr for Material {
    type Err = RecipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Material::A),
            "B" => Ok(Material::B),
            "C" => Ok(Material::C),
            "D" => Ok(Material::D),
            other => Err(RecipeError::InvalidMaterial(other.to_string())),
        }
    }
}

/// Ordered mapping from layer number to target material. Entries are
/// removed as their changes are executed; the map itself is the record of
/// what remains to be done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipe {
    changes: BTreeMap<u32, Material>,
}

impl Recipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses recipe text leniently: every well-formed pair is kept, every
    /// malformed pair is skipped with a logged reason. Duplicate layers keep
    /// the later entry.
    pub fn parse(text: &str) -> Self {
        let mut changes = BTreeMap::new();
        let text = text.trim();
        if text.is_empty() {
            return Self { changes };
        }

        for (index, pair) in text.split(':').enumerate() {
            let entry = index + 1;
            let Some((material_str, layer_str)) = pair.split_once(',') else {
                tracing::warn!("Recipe entry {} '{}' skipped: no comma", entry, pair);
                continue;
            };

            let material = match material_str.parse::<Material>() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!("Recipe entry {} '{}' skipped: {}", entry, pair, e);
                    continue;
                }
            };

            let layer = match layer_str.trim().parse::<u32>() {
                Ok(0) | Err(_) => {
                    tracing::warn!(
                        "Recipe entry {} '{}' skipped: layer must be a positive integer",
                        entry,
                        pair
                    );
                    continue;
                }
                Ok(layer) => layer,
            };

            if let Some(previous) = changes.insert(layer, material) {
                tracing::warn!(
                    "Recipe layer {} duplicated: overriding {} with {}",
                    layer,
                    previous,
                    material
                );
            }
        }

        tracing::info!("Parsed recipe with {} material change(s)", changes.len());
        Self { changes }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RecipeError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Inverse of `parse`, in ascending layer order.
    pub fn serialize(&self) -> String {
        self.changes
            .iter()
            .map(|(layer, material)| format!("{},{}", material, layer))
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn get(&self, layer: u32) -> Option<Material> {
        self.changes.get(&layer).copied()
    }

    /// Removes and returns the change scheduled for `layer`.
    pub fn take(&mut self, layer: u32) -> Option<Material> {
        self.changes.remove(&layer)
    }

    /// The next scheduled change strictly after `layer`, if any.
    pub fn next_change_after(&self, layer: u32) -> Option<(u32, Material)> {
        self.changes
            .range(layer + 1..)
            .next()
            .map(|(l, m)| (*l, *m))
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Material)> + '_ {
        self.changes.iter().map(|(l, m)| (*l, *m))
    }
}
