//! Member access rules

use crate::unit::{package_of, Modifiers, Visibility};

/// Whether code running as `caller` may use a member of `declaring` with `modifiers`
///
/// `caller_extends` is only consulted for protected members.
pub fn can_access(caller: &str, declaring: &str, modifiers: Modifiers, caller_extends: impl FnOnce() -> bool) -> bool {
    match modifiers.visibility() {
        Visibility::Public => true,
        Visibility::Private => caller == declaring,
        Visibility::Package => package_of(caller) == package_of(declaring),
        Visibility::Protected => package_of(caller) == package_of(declaring) || caller_extends(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_rules() {
        let never = || false;
        assert!(can_access("b.X", "a.T", Modifiers::PUBLIC, never));
        assert!(can_access("a.T", "a.T", Modifiers::PRIVATE, never));
        assert!(!can_access("a.U", "a.T", Modifiers::PRIVATE, never));
        assert!(can_access("a.U", "a.T", Modifiers::empty(), never));
        assert!(!can_access("b.U", "a.T", Modifiers::empty(), never));
        assert!(can_access("a.U", "a.T", Modifiers::PROTECTED, never));
        assert!(!can_access("b.U", "a.T", Modifiers::PROTECTED, never));
        assert!(can_access("b.U", "a.T", Modifiers::PROTECTED, || true));
    }
}
