//! Logical cache keys for catalog resources.

use std::fmt;

/// Prefix shared by every bounded-list key.
pub const BATCH_PREFIX: &str = "focaccias_batch_";

/// Cache key for each catalog resource. Keys never overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CatalogKey {
  /// The full catalog list
  All,
  /// The featured subset
  Featured,
  /// The first `n` items, or every item when `None`
  Batch(Option<usize>),
  /// A single item by id
  Item(u64),
}

impl CatalogKey {
  /// Keys refreshed in the background when served from a fresh entry.
  pub fn revalidates(&self) -> bool {
    matches!(self, Self::All | Self::Featured)
  }
}

impl fmt::Display for CatalogKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::All => f.write_str("focaccias"),
      Self::Featured => f.write_str("featuredFocaccias"),
      Self::Batch(Some(n)) => write!(f, "{}{}", BATCH_PREFIX, n),
      Self::Batch(None) => write!(f, "{}all", BATCH_PREFIX),
      Self::Item(id) => write!(f, "focaccia_{}", id),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_names() {
    assert_eq!(CatalogKey::All.to_string(), "focaccias");
    assert_eq!(CatalogKey::Featured.to_string(), "featuredFocaccias");
    assert_eq!(CatalogKey::Batch(Some(4)).to_string(), "focaccias_batch_4");
    assert_eq!(CatalogKey::Batch(None).to_string(), "focaccias_batch_all");
    assert_eq!(CatalogKey::Item(5).to_string(), "focaccia_5");
  }

  #[test]
  fn test_item_key_does_not_collide_with_lists() {
    let item = CatalogKey::Item(5).to_string();
    assert!(!item.starts_with(BATCH_PREFIX));
    assert_ne!(item, CatalogKey::All.to_string());
  }

  #[test]
  fn test_only_main_lists_revalidate() {
    assert!(CatalogKey::All.revalidates());
    assert!(CatalogKey::Featured.revalidates());
    assert!(!CatalogKey::Batch(Some(1)).revalidates());
    assert!(!CatalogKey::Item(5).revalidates());
  }
}
