//! The shared variable registry.
//!
//! The [`Kiosk`] maps variable names to their current values. Every entry
//! has exactly one owning component; only the owner may update it, and all
//! entries of an owner disappear together when the owner is retired.
//!
//! # Design
//!
//! - **Single owner**: publishing a name that already has a live owner is a
//!   configuration error.
//! - **Typed handles**: `publish` returns a [`Handle<T>`] carrying the slot
//!   and its generation. Writes and fast reads go through the handle, so a
//!   handle outliving its entry is detected instead of aliasing a new one.
//! - **Two phases**: entries are flagged [`VarKind::State`] or
//!   [`VarKind::Rate`]. While the rates phase is open, writes to state
//!   entries are rejected.

use core::fmt;
use core::marker::PhantomData;
use std::collections::BTreeMap;

use serde::Serialize;

use agrosim_types::ComponentId;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A published value: a scalar or a per-layer profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// A single number.
    Scalar(f64),
    /// One number per soil layer, top to bottom.
    Profile(Vec<f64>),
}

impl Value {
    /// The scalar, if this is one.
    pub const fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Profile(_) => None,
        }
    }

    /// The profile, if this is one.
    pub fn as_profile(&self) -> Option<&[f64]> {
        match self {
            Self::Scalar(_) => None,
            Self::Profile(v) => Some(v),
        }
    }

    const fn type_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Profile(_) => "profile",
        }
    }
}

/// Rust types that can be stored in the kiosk.
pub trait KioskValue: Sized {
    /// Name used in type-mismatch errors.
    const TYPE_NAME: &'static str;

    /// Wrap into a [`Value`].
    fn into_value(self) -> Value;

    /// Extract from a [`Value`] if the variant matches.
    fn from_value(value: &Value) -> Option<Self>;
}

impl KioskValue for f64 {
    const TYPE_NAME: &'static str = "scalar";

    fn into_value(self) -> Value {
        Value::Scalar(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_scalar()
    }
}

impl KioskValue for Vec<f64> {
    const TYPE_NAME: &'static str = "profile";

    fn into_value(self) -> Value {
        Value::Profile(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_profile().map(<[f64]>::to_vec)
    }
}

/// Whether an entry is a state or a rate variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VarKind {
    /// Mutated only during integration.
    State,
    /// Mutated only while rates are computed.
    Rate,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KioskError {
    /// The name already has a live owner.
    #[error("variable '{name}' is already published by component {owner}")]
    DuplicateName {
        /// Variable name.
        name: String,
        /// Current owner.
        owner: ComponentId,
    },

    /// The name was never published (or has been unpublished).
    #[error("variable '{name}' not found in kiosk")]
    NotFound {
        /// Variable name.
        name: String,
    },

    /// A component tried to update an entry it does not own.
    #[error("component {caller} may not update '{name}' owned by {owner}")]
    NotOwner {
        /// Variable name.
        name: String,
        /// Component that attempted the write.
        caller: ComponentId,
        /// Actual owner.
        owner: ComponentId,
    },

    /// The handle refers to an entry that no longer exists.
    #[error("stale kiosk handle for slot {slot}")]
    StaleHandle {
        /// Slot index carried by the handle.
        slot: usize,
    },

    /// The stored value has a different shape than requested.
    #[error("variable '{name}' holds a {found}, expected a {expected}")]
    TypeMismatch {
        /// Variable name.
        name: String,
        /// Requested shape.
        expected: &'static str,
        /// Stored shape.
        found: &'static str,
    },

    /// A state entry was written while rates were being computed.
    #[error("state variable '{name}' written during the rates phase")]
    StateWriteDuringRates {
        /// Variable name.
        name: String,
    },
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// A typed, generation-checked reference to a kiosk entry.
pub struct Handle<T> {
    slot: usize,
    generation: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    const fn new(slot: usize, generation: u64) -> Self {
        Self {
            slot,
            generation,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Kiosk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    value: Value,
    owner: ComponentId,
    kind: VarKind,
    generation: u64,
}

/// The shared variable registry for one simulation run.
#[derive(Debug, Default)]
pub struct Kiosk {
    slots: Vec<Option<Entry>>,
    index: BTreeMap<String, usize>,
    free: Vec<usize>,
    next_generation: u64,
    in_rates: bool,
}

impl Kiosk {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            index: BTreeMap::new(),
            free: Vec::new(),
            next_generation: 0,
            in_rates: false,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether `name` currently has a live owner.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    /// Publish `name` with an initial value, owned by `owner`.
    pub fn publish<T: KioskValue>(
        &mut self,
        name: &str,
        initial: T,
        kind: VarKind,
        owner: ComponentId,
    ) -> Result<Handle<T>, KioskError> {
        if let Some(existing) = self.entry_by_name(name) {
            return Err(KioskError::DuplicateName {
                name: name.to_owned(),
                owner: existing.owner,
            });
        }

        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        let entry = Entry {
            name: name.to_owned(),
            value: initial.into_value(),
            owner,
            kind,
            generation,
        };

        let slot = if let Some(slot) = self.free.pop() {
            if let Some(cell) = self.slots.get_mut(slot) {
                *cell = Some(entry);
            }
            slot
        } else {
            self.slots.push(Some(entry));
            self.slots.len().saturating_sub(1)
        };
        self.index.insert(name.to_owned(), slot);

        tracing::trace!(name, %owner, ?kind, "Published variable");
        Ok(Handle::new(slot, generation))
    }

    /// Remove every entry owned by `owner`. Returns the number removed.
    pub fn unpublish(&mut self, owner: ComponentId) -> usize {
        let mut removed = 0_usize;
        for (slot, cell) in self.slots.iter_mut().enumerate() {
            if cell.as_ref().is_some_and(|e| e.owner == owner) {
                if let Some(entry) = cell.take() {
                    self.index.remove(&entry.name);
                    self.free.push(slot);
                    removed = removed.saturating_add(1);
                }
            }
        }
        tracing::debug!(%owner, removed, "Unpublished component variables");
        removed
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Current value of `name`.
    pub fn value(&self, name: &str) -> Result<&Value, KioskError> {
        self.entry_by_name(name)
            .map(|e| &e.value)
            .ok_or_else(|| KioskError::NotFound {
                name: name.to_owned(),
            })
    }

    /// Current value of the scalar `name`.
    pub fn scalar(&self, name: &str) -> Result<f64, KioskError> {
        let value = self.value(name)?;
        value.as_scalar().ok_or_else(|| KioskError::TypeMismatch {
            name: name.to_owned(),
            expected: "scalar",
            found: value.type_name(),
        })
    }

    /// Current value of the profile `name`.
    pub fn profile(&self, name: &str) -> Result<&[f64], KioskError> {
        let value = self.value(name)?;
        value.as_profile().ok_or_else(|| KioskError::TypeMismatch {
            name: name.to_owned(),
            expected: "profile",
            found: value.type_name(),
        })
    }

    /// The scalar `name` if it is currently published.
    ///
    /// Used for optional couplings such as crop transpiration, which only
    /// exists while a crop is active.
    pub fn find_scalar(&self, name: &str) -> Option<f64> {
        self.entry_by_name(name).and_then(|e| e.value.as_scalar())
    }

    /// The profile `name` if it is currently published.
    pub fn find_profile(&self, name: &str) -> Option<&[f64]> {
        self.entry_by_name(name).and_then(|e| e.value.as_profile())
    }

    /// Read through a handle.
    pub fn get<T: KioskValue>(&self, handle: Handle<T>) -> Result<T, KioskError> {
        let entry = self.entry_by_handle(handle)?;
        T::from_value(&entry.value).ok_or_else(|| KioskError::TypeMismatch {
            name: entry.name.clone(),
            expected: T::TYPE_NAME,
            found: entry.value.type_name(),
        })
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    /// Update the entry behind `handle`. Only `owner` may write.
    pub fn set<T: KioskValue>(
        &mut self,
        handle: Handle<T>,
        value: T,
        owner: ComponentId,
    ) -> Result<(), KioskError> {
        let in_rates = self.in_rates;
        let entry = self
            .slots
            .get_mut(handle.slot)
            .and_then(Option::as_mut)
            .filter(|e| e.generation == handle.generation)
            .ok_or(KioskError::StaleHandle { slot: handle.slot })?;

        if entry.owner != owner {
            return Err(KioskError::NotOwner {
                name: entry.name.clone(),
                caller: owner,
                owner: entry.owner,
            });
        }
        if in_rates && entry.kind == VarKind::State {
            return Err(KioskError::StateWriteDuringRates {
                name: entry.name.clone(),
            });
        }

        entry.value = value.into_value();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    /// Open the rates phase. State writes fail until [`Kiosk::end_rates`].
    pub const fn begin_rates(&mut self) {
        self.in_rates = true;
    }

    /// Close the rates phase.
    pub const fn end_rates(&mut self) {
        self.in_rates = false;
    }

    /// Whether the rates phase is open.
    pub const fn in_rates_phase(&self) -> bool {
        self.in_rates
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// All state entries by name.
    pub fn state_snapshot(&self) -> BTreeMap<String, Value> {
        self.slots
            .iter()
            .flatten()
            .filter(|e| e.kind == VarKind::State)
            .map(|e| (e.name.clone(), e.value.clone()))
            .collect()
    }

    /// Values for the requested names. Names without a live entry are
    /// omitted.
    pub fn snapshot<S: AsRef<str>>(&self, names: &[S]) -> BTreeMap<String, Value> {
        names
            .iter()
            .filter_map(|n| {
                self.entry_by_name(n.as_ref())
                    .map(|e| (e.name.clone(), e.value.clone()))
            })
            .collect()
    }

    /// Names owned by `owner`, sorted.
    pub fn owned_by(&self, owner: ComponentId) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .slots
            .iter()
            .flatten()
            .filter(|e| e.owner == owner)
            .map(|e| e.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    fn entry_by_name(&self, name: &str) -> Option<&Entry> {
        self.index
            .get(name)
            .and_then(|slot| self.slots.get(*slot))
            .and_then(Option::as_ref)
    }

    fn entry_by_handle<T>(&self, handle: Handle<T>) -> Result<&Entry, KioskError> {
        self.slots
            .get(handle.slot)
            .and_then(Option::as_ref)
            .filter(|e| e.generation == handle.generation)
            .ok_or(KioskError::StaleHandle { slot: handle.slot })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_read() {
        let mut kiosk = Kiosk::new();
        let owner = ComponentId::new();
        let h = kiosk.publish("LAI", 0.5, VarKind::State, owner).unwrap();
        assert!((kiosk.get(h).unwrap() - 0.5).abs() < f64::EPSILON);
        assert!((kiosk.scalar("LAI").unwrap() - 0.5).abs() < f64::EPSILON);
        assert!(kiosk.contains("LAI"));
    }

    #[test]
    fn duplicate_publish_fails_while_owner_live() {
        let mut kiosk = Kiosk::new();
        let first = ComponentId::new();
        let second = ComponentId::new();
        kiosk.publish("DVS", 0.0, VarKind::State, first).unwrap();
        let err = kiosk.publish("DVS", 0.0, VarKind::State, second).unwrap_err();
        assert_eq!(
            err,
            KioskError::DuplicateName {
                name: "DVS".to_owned(),
                owner: first
            }
        );
    }

    #[test]
    fn republish_after_unpublish_by_other_owner() {
        let mut kiosk = Kiosk::new();
        let first = ComponentId::new();
        let second = ComponentId::new();
        kiosk.publish("DVS", 0.0, VarKind::State, first).unwrap();
        kiosk.publish("TAGP", 0.0, VarKind::State, first).unwrap();
        assert_eq!(kiosk.unpublish(first), 2);
        assert!(kiosk.is_empty());
        assert!(kiosk.publish("DVS", 1.0, VarKind::State, second).is_ok());
    }

    #[test]
    fn unknown_name_is_not_found() {
        let kiosk = Kiosk::new();
        assert_eq!(
            kiosk.scalar("SM").unwrap_err(),
            KioskError::NotFound {
                name: "SM".to_owned()
            }
        );
        assert!(kiosk.find_scalar("SM").is_none());
    }

    #[test]
    fn only_owner_may_set() {
        let mut kiosk = Kiosk::new();
        let owner = ComponentId::new();
        let intruder = ComponentId::new();
        let h = kiosk.publish("RD", 10.0, VarKind::State, owner).unwrap();
        assert!(matches!(
            kiosk.set(h, 20.0, intruder),
            Err(KioskError::NotOwner { .. })
        ));
        kiosk.set(h, 20.0, owner).unwrap();
        assert!((kiosk.get(h).unwrap() - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stale_handle_detected_after_slot_reuse() {
        let mut kiosk = Kiosk::new();
        let a = ComponentId::new();
        let b = ComponentId::new();
        let old = kiosk.publish("TRA", 0.1, VarKind::Rate, a).unwrap();
        kiosk.unpublish(a);
        let fresh = kiosk.publish("EVS", 0.2, VarKind::Rate, b).unwrap();
        assert!(matches!(kiosk.get(old), Err(KioskError::StaleHandle { .. })));
        assert!(matches!(
            kiosk.set(old, 1.0, a),
            Err(KioskError::StaleHandle { .. })
        ));
        assert!((kiosk.get(fresh).unwrap() - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn state_writes_rejected_during_rates() {
        let mut kiosk = Kiosk::new();
        let owner = ComponentId::new();
        let state = kiosk.publish("SM", 0.3, VarKind::State, owner).unwrap();
        let rate = kiosk.publish("EVS", 0.0, VarKind::Rate, owner).unwrap();

        kiosk.begin_rates();
        let before = kiosk.state_snapshot();
        assert!(matches!(
            kiosk.set(state, 0.1, owner),
            Err(KioskError::StateWriteDuringRates { .. })
        ));
        kiosk.set(rate, 0.05, owner).unwrap();
        assert_eq!(before, kiosk.state_snapshot());
        kiosk.end_rates();

        kiosk.set(state, 0.1, owner).unwrap();
        assert_ne!(before, kiosk.state_snapshot());
    }

    #[test]
    fn profiles_and_type_mismatch() {
        let mut kiosk = Kiosk::new();
        let owner = ComponentId::new();
        let h = kiosk
            .publish("SM_LAYERS", vec![0.3, 0.25], VarKind::State, owner)
            .unwrap();
        assert_eq!(kiosk.profile("SM_LAYERS").unwrap(), &[0.3, 0.25]);
        assert_eq!(kiosk.get(h).unwrap(), vec![0.3, 0.25]);
        assert!(matches!(
            kiosk.scalar("SM_LAYERS"),
            Err(KioskError::TypeMismatch { expected: "scalar", .. })
        ));
    }

    #[test]
    fn snapshot_skips_missing_names() {
        let mut kiosk = Kiosk::new();
        let owner = ComponentId::new();
        kiosk.publish("LAI", 1.0, VarKind::State, owner).unwrap();
        let snap = kiosk.snapshot(&["LAI", "TWSO"]);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get("LAI"), Some(&Value::Scalar(1.0)));
    }

    #[test]
    fn owned_by_lists_sorted_names() {
        let mut kiosk = Kiosk::new();
        let owner = ComponentId::new();
        kiosk.publish("WLV", 1.0, VarKind::State, owner).unwrap();
        kiosk.publish("DVS", 0.0, VarKind::State, owner).unwrap();
        kiosk.publish("X", 0.0, VarKind::State, ComponentId::new()).unwrap();
        assert_eq!(kiosk.owned_by(owner), vec!["DVS", "WLV"]);
    }
}
