// Injection tokens

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum TokenKey {
    Type(TypeId),
    Named(&'static str),
    Qualified(TypeId, &'static str),
}

/// Identity used to request a provider from the container.
///
/// A token is either the provider type itself (`Token::of::<T>()`) or an
/// explicit name (`Token::named("DATABASE_URL")`). Equality and hashing only
/// look at that identity; the display name is carried for diagnostics.
#[derive(Clone, Copy)]
pub struct Token {
    key: TokenKey,
    name: &'static str,
}

impl Token {
    /// Token identified by the type `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            key: TokenKey::Type(TypeId::of::<T>()),
            name: std::any::type_name::<T>(),
        }
    }

    /// Explicit token identified by `name`.
    ///
    /// Named tokens compare by string, so two declarations using the same
    /// name refer to the same provider even if they come from unrelated
    /// modules. Use [`Token::qualified`] when a name is not meant to be
    /// shared.
    pub const fn named(name: &'static str) -> Self {
        Self {
            key: TokenKey::Named(name),
            name,
        }
    }

    /// Explicit token identified by `name` within the namespace of `Owner`.
    /// Equal names under different owners are different tokens.
    pub fn qualified<Owner: ?Sized + 'static>(name: &'static str) -> Self {
        Self {
            key: TokenKey::Qualified(TypeId::of::<Owner>(), name),
            name,
        }
    }

    /// Name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this token was created from a type.
    pub fn is_type(&self) -> bool {
        matches!(self.key, TokenKey::Type(_))
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.name)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
