//! Precision tags: storage dtype resolution and scoped autocast.
//!
//! Precision is configured with the same string tags the training scripts
//! accept (`"amp"`, `"amp_bf16"`, `"bf16"`, `"fp16"`, `"fp32"`, ...). Unknown
//! tags are not an error; they simply resolve to "no cast" / "no autocast".

use std::cell::Cell;

use burn::tensor::{bf16, f16, DType, TensorData};

/// Reduced-precision float type used for storage or autocast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDType {
    /// bfloat16: 8-bit exponent, 7-bit mantissa.
    BFloat16,
    /// IEEE half precision.
    Float16,
}

impl ComputeDType {
    /// Round float host data to this precision before it is uploaded.
    ///
    /// Backends that store a wider float type keep the rounded values, so the
    /// numbers seen by the model match what a native reduced-precision
    /// backend would hold.
    pub fn apply(self, data: TensorData) -> TensorData {
        match self {
            ComputeDType::BFloat16 => data.convert::<bf16>(),
            ComputeDType::Float16 => data.convert::<f16>(),
        }
    }
}

impl From<ComputeDType> for DType {
    fn from(value: ComputeDType) -> Self {
        match value {
            ComputeDType::BFloat16 => DType::BF16,
            ComputeDType::Float16 => DType::F16,
        }
    }
}

/// Map a precision tag to the dtype batch tensors are stored in.
///
/// `"bf16"` → bfloat16, `"fp16"` → half, anything else → `None` (keep the
/// backend's default float type).
pub fn resolve_compute_dtype(precision: &str) -> Option<ComputeDType> {
    match precision {
        "bf16" => Some(ComputeDType::BFloat16),
        "fp16" => Some(ComputeDType::Float16),
        _ => None,
    }
}

/// Map a precision tag to an autocast scope.
///
/// `"amp"` → mixed precision at float16, `"amp_bfloat16"` / `"amp_bf16"` →
/// mixed precision at bfloat16, anything else → a disabled scope.
pub fn resolve_autocast(precision: &str) -> Autocast {
    match precision {
        "amp" => Autocast::Enabled(ComputeDType::Float16),
        // bf16 autocast is the more stable choice for clip-style training
        "amp_bfloat16" | "amp_bf16" => Autocast::Enabled(ComputeDType::BFloat16),
        _ => Autocast::Disabled,
    }
}

thread_local! {
    static ACTIVE: Cell<Option<ComputeDType>> = const { Cell::new(None) };
}

/// The autocast dtype active on the current thread, if any.
///
/// Model implementations read this inside `forward` to decide which
/// operations run in reduced precision.
pub fn active_autocast() -> Option<ComputeDType> {
    ACTIVE.with(|a| a.get())
}

/// A mixed-precision scope that can be entered around a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Autocast {
    /// Entering the scope changes nothing.
    Disabled,
    /// Entering the scope activates mixed precision at the given dtype.
    Enabled(ComputeDType),
}

impl Autocast {
    /// Whether entering this scope activates mixed precision.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Autocast::Enabled(_))
    }

    pub fn dtype(&self) -> Option<ComputeDType> {
        match *self {
            Autocast::Enabled(dtype) => Some(dtype),
            Autocast::Disabled => None,
        }
    }

    /// Enter the scope. It stays active until the returned guard is dropped.
    #[must_use = "autocast is only active while the guard is alive"]
    pub fn enter(&self) -> AutocastGuard {
        let previous = active_autocast();
        if let Autocast::Enabled(dtype) = *self {
            ACTIVE.with(|a| a.set(Some(dtype)));
        }
        AutocastGuard { previous }
    }

    /// Run `f` inside the scope.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter();
        f()
    }
}

/// Restores the previous autocast state on drop.
#[derive(Debug)]
pub struct AutocastGuard {
    previous: Option<ComputeDType>,
}

impl Drop for AutocastGuard {
    fn drop(&mut self) {
        ACTIVE.with(|a| a.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_dtype_tags() {
        assert_eq!(resolve_compute_dtype("bf16"), Some(ComputeDType::BFloat16));
        assert_eq!(resolve_compute_dtype("fp16"), Some(ComputeDType::Float16));
        assert_eq!(resolve_compute_dtype("fp32"), None);
        assert_eq!(resolve_compute_dtype("amp"), None);
        assert_eq!(resolve_compute_dtype(""), None);
    }

    #[test]
    fn test_dtype_mapping() {
        assert_eq!(DType::from(ComputeDType::BFloat16), DType::BF16);
        assert_eq!(DType::from(ComputeDType::Float16), DType::F16);
    }

    #[test]
    fn test_apply_rounds_to_reduced_precision() {
        // 1 + 2^-10 is representable in f16 but not in bf16 (7-bit mantissa)
        let value = 1.0_f32 + 2.0_f32.powi(-10);
        let data = TensorData::new(vec![value], [1]);

        let half: Vec<f32> = ComputeDType::Float16
            .apply(data.clone())
            .convert::<f32>()
            .to_vec()
            .unwrap();
        assert_eq!(half, vec![value]);

        let bf: Vec<f32> = ComputeDType::BFloat16
            .apply(data)
            .convert::<f32>()
            .to_vec()
            .unwrap();
        assert_eq!(bf, vec![1.0]);
    }

    #[test]
    fn test_autocast_tags() {
        assert_eq!(resolve_autocast("amp"), Autocast::Enabled(ComputeDType::Float16));
        assert_eq!(
            resolve_autocast("amp_bfloat16"),
            Autocast::Enabled(ComputeDType::BFloat16)
        );
        assert_eq!(
            resolve_autocast("amp_bf16"),
            Autocast::Enabled(ComputeDType::BFloat16)
        );
        assert_eq!(resolve_autocast("bf16"), Autocast::Disabled);
        assert_eq!(resolve_autocast("whatever"), Autocast::Disabled);
    }

    #[test]
    fn test_disabled_scope_is_noop() {
        assert_eq!(active_autocast(), None);
        {
            let _g = resolve_autocast("fp32").enter();
            assert_eq!(active_autocast(), None);
        }
        assert_eq!(active_autocast(), None);
    }

    #[test]
    fn test_enabled_scope_activates_and_restores() {
        for tag in ["amp", "amp_bfloat16", "amp_bf16"] {
            let scope = resolve_autocast(tag);
            assert!(scope.is_enabled());
            let seen = scope.run(active_autocast);
            assert!(seen.is_some(), "{tag} should activate autocast");
            assert_eq!(active_autocast(), None, "{tag} should restore on exit");
        }
    }

    #[test]
    fn test_nested_scopes_restore_outer() {
        let outer = resolve_autocast("amp_bf16").enter();
        {
            let _inner = resolve_autocast("amp").enter();
            assert_eq!(active_autocast(), Some(ComputeDType::Float16));
            {
                // A disabled scope inside an enabled one leaves it untouched.
                let _noop = Autocast::Disabled.enter();
                assert_eq!(active_autocast(), Some(ComputeDType::Float16));
            }
        }
        assert_eq!(active_autocast(), Some(ComputeDType::BFloat16));
        drop(outer);
        assert_eq!(active_autocast(), None);
    }
}
