//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity and are compared by their attributes. In the
/// ledger these are prices, currency codes and variant lines: constructors
/// validate them once, after which they are plain immutable values.
///
/// ```ignore
/// let a = UnitPrice::new(dec!(12.50))?;
/// let b = UnitPrice::new(dec!(12.50))?;
/// assert_eq!(a, b);
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
