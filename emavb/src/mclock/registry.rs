use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::FnvIndexMap;

use emavb_core::InvalidValue;

use crate::config::MCLOCK_DOMAIN_MAX;
use crate::mclock::MclockError;

/// Media clock domain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DomainId(u8);

impl DomainId {
    pub const fn try_from_u8(value: u8) -> Result<Self, InvalidValue> {
        if value < MCLOCK_DOMAIN_MAX as u8 {
            Ok(Self(value))
        } else {
            Err(InvalidValue)
        }
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockRole {
    Recovery,
    Generation,
}

/// Tracks which media clock domains are in use.
///
/// A domain is driven by exactly one recovery or one generator at a time.
/// Claiming returns a guard that releases the domain on drop.
pub struct ClockRegistry<M: RawMutex> {
    domains: Mutex<M, RefCell<FnvIndexMap<u8, ClockRole, MCLOCK_DOMAIN_MAX>>>,
}

impl<M: RawMutex> ClockRegistry<M> {
    pub const fn new() -> Self {
        Self {
            domains: Mutex::new(RefCell::new(FnvIndexMap::new())),
        }
    }

    pub fn claim(&self, domain: DomainId, role: ClockRole) -> Result<ClockClaim<'_, M>, MclockError> {
        self.domains.lock(|domains| {
            let mut domains = domains.borrow_mut();
            if domains.contains_key(&domain.0) {
                return Err(MclockError::DomainBusy);
            }
            domains
                .insert(domain.0, role)
                .map_err(|_| MclockError::DomainBusy)?;
            Ok(())
        })?;

        Ok(ClockClaim {
            registry: self,
            domain,
            role,
        })
    }

    pub fn role(&self, domain: DomainId) -> Option<ClockRole> {
        self.domains
            .lock(|domains| domains.borrow().get(&domain.0).copied())
    }
}

impl<M: RawMutex> Default for ClockRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ClockClaim<'a, M: RawMutex> {
    registry: &'a ClockRegistry<M>,
    domain: DomainId,
    role: ClockRole,
}

impl<M: RawMutex> ClockClaim<'_, M> {
    pub fn domain(&self) -> DomainId {
        self.domain
    }

    pub fn role(&self) -> ClockRole {
        self.role
    }
}

impl<M: RawMutex> Drop for ClockClaim<'_, M> {
    fn drop(&mut self) {
        self.registry.domains.lock(|domains| {
            domains.borrow_mut().remove(&self.domain.0);
        });
    }
}
