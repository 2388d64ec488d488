//! Kiosk bookkeeping shared by the crop submodels.
//!
//! Each submodel describes its published variables as `(name, accessor)`
//! pairs over its state or rate struct. [`Published`] holds the handles
//! returned by the kiosk and writes the whole struct back in one call.

use agrosim_kernel::{Handle, Kiosk, KioskError, VarKind};
use agrosim_types::ComponentId;

/// Accessor of one published field.
pub(crate) type Field<T> = (&'static str, fn(&T) -> f64);

/// Handles for a published record.
#[derive(Debug, Clone)]
pub(crate) struct Published<T> {
    entries: Vec<(Handle<f64>, fn(&T) -> f64)>,
}

impl<T> Published<T> {
    /// Publish every field of `value` under `owner`.
    pub(crate) fn publish(
        kiosk: &mut Kiosk,
        owner: ComponentId,
        kind: VarKind,
        fields: &[Field<T>],
        value: &T,
    ) -> Result<Self, KioskError> {
        let entries = fields
            .iter()
            .map(|(name, field)| Ok((kiosk.publish(name, field(value), kind, owner)?, *field)))
            .collect::<Result<Vec<_>, KioskError>>()?;
        Ok(Self { entries })
    }

    /// Write the current values of `value` to the kiosk.
    pub(crate) fn write(&self, kiosk: &mut Kiosk, owner: ComponentId, value: &T) -> Result<(), KioskError> {
        for (handle, field) in &self.entries {
            kiosk.set(*handle, field(value), owner)?;
        }
        Ok(())
    }
}

/// Convert a boolean into the 0/1 number stored in the kiosk.
pub(crate) const fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

/// Convert a day counter into a kiosk number.
pub(crate) fn count(value: u32) -> f64 {
    f64::from(value)
}
