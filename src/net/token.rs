//! 令牌与令牌注册表.
//!
//! 令牌只在创建时由 [`TokenRegistry`] 分配标识符, 之后随库所队列整体移动, 从不复制.
use std::fmt;
use std::sync::Mutex;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::net::ids::{INITIAL_TOKEN_ID, TokenId};

/// Category tag of a token. Places keep one FIFO queue per label and arcs
/// move tokens of exactly one label.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Label(pub u32);

impl Label {
    /// Label used when a net does not discriminate tokens.
    pub const GENERIC: Label = Label(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn is_generic(self) -> bool {
        self.0 == Self::GENERIC.0
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::GENERIC
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_generic() {
            write!(f, "Label(generic)")
        } else {
            write!(f, "Label({})", self.0)
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Token {
    id: TokenId,
    label: Label,
}

impl Token {
    pub fn id(&self) -> TokenId {
        self.id
    }

    pub fn label(&self) -> Label {
        self.label
    }
}

#[derive(Debug)]
struct TokenBook {
    last_id: TokenId,
    minted: IndexMap<Label, u64>,
}

/// Allocates monotonically increasing token ids. Ids are never reused; there
/// is no deletion, a token simply disappears once no place holds it.
#[derive(Debug)]
pub struct TokenRegistry {
    book: Mutex<TokenBook>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(TokenBook {
                last_id: INITIAL_TOKEN_ID,
                minted: IndexMap::new(),
            }),
        }
    }

    pub fn create(&self, label: Label) -> Token {
        let mut book = self.book.lock().unwrap_or_else(|e| e.into_inner());
        book.last_id = book.last_id.next();
        *book.minted.entry(label).or_insert(0) += 1;
        Token {
            id: book.last_id,
            label,
        }
    }

    pub fn create_many(&self, label: Label, count: u64) -> Vec<Token> {
        (0..count).map(|_| self.create(label)).collect()
    }

    /// Number of tokens ever minted with `label`.
    pub fn minted(&self, label: Label) -> u64 {
        let book = self.book.lock().unwrap_or_else(|e| e.into_inner());
        book.minted.get(&label).copied().unwrap_or(0)
    }

    pub fn last_id(&self) -> TokenId {
        self.book.lock().unwrap_or_else(|e| e.into_inner()).last_id
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_monotonically_across_labels() {
        let registry = TokenRegistry::new();
        let a = registry.create(Label::GENERIC);
        let b = registry.create(Label::new(3));
        let c = registry.create(Label::GENERIC);

        assert_eq!(a.id(), TokenId::new(1));
        assert!(a.id() < b.id() && b.id() < c.id());
        assert_eq!(b.label(), Label::new(3));
        assert_eq!(registry.minted(Label::GENERIC), 2);
        assert_eq!(registry.minted(Label::new(3)), 1);
        assert_eq!(registry.last_id(), c.id());
    }

    #[test]
    fn create_many_mints_requested_count() {
        let registry = TokenRegistry::new();
        let tokens = registry.create_many(Label::new(1), 4);
        assert_eq!(tokens.len(), 4);
        assert!(tokens.iter().all(|t| t.label() == Label::new(1)));
        assert_eq!(registry.minted(Label::new(2)), 0);
    }
}
