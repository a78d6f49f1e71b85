//! Copy semantics for items forwarded to several forked pipes.

use std::sync::Arc;

/// An item type the scheduler can route through pipes.
///
/// When a fork step forwards one item to several pipes, the first route
/// receives the original, and every other route receives either `share()`
/// (the same underlying data) or `deep_copy()` (an independent copy),
/// depending on `copy_on_fork`. For plain values both are a clone; for
/// `Arc` payloads `share` hands out the same allocation.
pub trait DataItem: Send + 'static {
    /// Returns another handle to the same item.
    fn share(&self) -> Self;

    /// Returns an independent copy of the item.
    fn deep_copy(&self) -> Self;
}

macro_rules! impl_data_item_by_clone {
    ($($ty:ty),* $(,)?) => {
        $(
            impl DataItem for $ty {
                fn share(&self) -> Self {
                    self.clone()
                }

                fn deep_copy(&self) -> Self {
                    self.clone()
                }
            }
        )*
    };
}

impl_data_item_by_clone!(
    bool,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    char,
    String,
    &'static str,
    serde_json::Value,
);

impl<V> DataItem for Vec<V>
where
    V: Clone + Send + 'static,
{
    fn share(&self) -> Self {
        self.clone()
    }

    fn deep_copy(&self) -> Self {
        self.clone()
    }
}

impl<V> DataItem for Arc<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn share(&self) -> Self {
        Arc::clone(self)
    }

    fn deep_copy(&self) -> Self {
        Arc::new(V::clone(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arc_share_keeps_allocation() {
        let item = Arc::new(vec![1, 2, 3]);
        assert!(Arc::ptr_eq(&item, &item.share()));
    }

    #[test]
    fn test_arc_deep_copy_allocates() {
        let item = Arc::new(vec![1, 2, 3]);
        let copy = item.deep_copy();
        assert!(!Arc::ptr_eq(&item, &copy));
        assert_eq!(item, copy);
    }

    #[test]
    fn test_json_copy() {
        let item = serde_json::json!({"id": 1});
        assert_eq!(item.deep_copy(), item);
    }
}
