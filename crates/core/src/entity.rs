//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Movements are entities but not aggregates: they are created once and never
/// evolve, so they carry no version.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
