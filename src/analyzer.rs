//! Static analyzer of factory closures.
//!
//! The source runtime inspects `fn.toString()` to infer which controller
//! capabilities (`cleanup`/`release`/`reload`/`scope`) a factory actually
//! uses, so it can skip building the unused parts of the controller on
//! the hot resolution path. Rust closures carry no such reflectable
//! source text, so this analyzer always takes the conservative fallback
//! branch on analysis failure: every flag reports `true`, and
//! `NOOP_CONTROLLER` is never selected. `dependency_shape` is
//! not inferred at all — the caller already built a typed `Dependencies`
//! descriptor, so the shape is known statically rather than guessed.

use crate::dependency::DependencyShape;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerUsage {
    pub cleanup: bool,
    pub release: bool,
    pub reload: bool,
    pub scope: bool,
}

impl ControllerUsage {
    pub fn all() -> Self {
        Self { cleanup: true, release: true, reload: true, scope: true }
    }

    pub fn none() -> Self {
        Self { cleanup: false, release: false, reload: false, scope: false }
    }

    pub fn is_noop(self) -> bool {
        self == Self::none()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Inference {
    pub dependency_shape: DependencyShape,
    pub usage: ControllerUsage,
}

/// Always reports the conservative fallback: every controller capability
/// is assumed used. See the module doc for why.
pub fn analyze(shape: DependencyShape) -> Inference {
    Inference { dependency_shape: shape, usage: ControllerUsage::all() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_always_all_true() {
        let inference = analyze(DependencyShape::None);
        assert!(inference.usage.cleanup);
        assert!(inference.usage.release);
        assert!(inference.usage.reload);
        assert!(inference.usage.scope);
        assert!(!inference.usage.is_noop());
    }
}
