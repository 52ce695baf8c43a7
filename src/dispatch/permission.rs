//! Permission policies consulted before and after the instance is loaded.

use crate::dispatch::{Actor, OperationEntry};
use crate::value::Record;

pub const DEFAULT_DENIAL: &str = "you do not have permission to perform this action";

/// Both checks default to allow, so a policy only overrides what it restricts.
pub trait Permission: Send + Sync {
    fn name(&self) -> &str;

    fn has_permission(&self, _actor: &Actor, _operation: &OperationEntry) -> bool {
        true
    }

    fn has_object_permission(&self, _actor: &Actor, _operation: &OperationEntry, _record: &Record) -> bool {
        true
    }

    fn message(&self) -> &str {
        DEFAULT_DENIAL
    }
}

pub struct AllowAny;

impl Permission for AllowAny {
    fn name(&self) -> &str {
        "allow_any"
    }
}

pub struct IsAuthenticated;

impl Permission for IsAuthenticated {
    fn name(&self) -> &str {
        "is_authenticated"
    }

    fn has_permission(&self, actor: &Actor, _operation: &OperationEntry) -> bool {
        actor.is_authenticated()
    }
}

/// Anyone may read; writes need an identity.
pub struct IsAuthenticatedOrReadOnly;

impl Permission for IsAuthenticatedOrReadOnly {
    fn name(&self) -> &str {
        "is_authenticated_or_read_only"
    }

    fn has_permission(&self, actor: &Actor, operation: &OperationEntry) -> bool {
        operation.is_safe() || actor.is_authenticated()
    }
}

/// Object writes are limited to the actor named by `owner_field`.
pub struct IsOwnerOrReadOnly {
    owner_field: String,
}

impl IsOwnerOrReadOnly {
    pub fn new(owner_field: impl Into<String>) -> Self {
        IsOwnerOrReadOnly {
            owner_field: owner_field.into(),
        }
    }
}

impl Permission for IsOwnerOrReadOnly {
    fn name(&self) -> &str {
        "is_owner_or_read_only"
    }

    fn has_object_permission(&self, actor: &Actor, operation: &OperationEntry, record: &Record) -> bool {
        if operation.is_safe() {
            return true;
        }
        match (actor.identity(), record.get(&self.owner_field)) {
            (Some(identity), Some(owner)) => owner.same_key(&identity.id),
            _ => false,
        }
    }
}

pub struct IsStaff;

impl Permission for IsStaff {
    fn name(&self) -> &str {
        "is_staff"
    }

    fn has_permission(&self, actor: &Actor, _operation: &OperationEntry) -> bool {
        actor.is_staff()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Identity, OperationName, Segment};
    use crate::value::{FieldValue, InternalMap};
    use axum::http::Method;

    fn op(method: Method) -> OperationEntry {
        OperationEntry {
            resource: "snippets".into(),
            method,
            name: OperationName::Destroy,
            detail: true,
            segments: vec![Segment::Literal("snippets".into()), Segment::Lookup],
        }
    }

    fn snippet(owner: i64) -> Record {
        let mut f = InternalMap::new();
        f.insert("id".into(), FieldValue::Int(1));
        f.insert("owner".into(), FieldValue::Int(owner));
        Record::new("snippet", "id", f)
    }

    fn alice() -> Actor {
        Actor::User(Identity::new(FieldValue::Int(1), "alice"))
    }

    #[test]
    fn read_only_unless_authenticated() {
        let p = IsAuthenticatedOrReadOnly;
        assert!(p.has_permission(&Actor::Anonymous, &op(Method::GET)));
        assert!(!p.has_permission(&Actor::Anonymous, &op(Method::DELETE)));
        assert!(p.has_permission(&alice(), &op(Method::DELETE)));
    }

    #[test]
    fn owner_check_compares_keys() {
        let p = IsOwnerOrReadOnly::new("owner");
        assert!(p.has_object_permission(&alice(), &op(Method::DELETE), &snippet(1)));
        assert!(!p.has_object_permission(&alice(), &op(Method::DELETE), &snippet(2)));
        assert!(p.has_object_permission(&Actor::Anonymous, &op(Method::GET), &snippet(2)));
        let text_id = Actor::User(Identity::new("1", "alice"));
        assert!(p.has_object_permission(&text_id, &op(Method::PATCH), &snippet(1)));
    }

    #[test]
    fn staff_only() {
        let staff = Actor::User(Identity::new(FieldValue::Int(9), "root").staff());
        assert!(IsStaff.has_permission(&staff, &op(Method::GET)));
        assert!(!IsStaff.has_permission(&alice(), &op(Method::GET)));
    }
}
