// =============================================================================
// Ferrite OS — Device, Bus & Interrupt Contracts
// =============================================================================
//
// The boundary between this crate's drivers and the machinery that owns
// devices. Enumeration, resource assignment and interrupt routing all live
// in the kernel proper; a driver sees only:
//
//   Device        — unit number plus the resources assigned to it
//   Bus           — maps resources and performs byte-wide register access
//   IrqController — installs/removes the driver's interrupt filter
//   Driver        — probe/attach entry points the device framework calls
//
// All of them are traits (except the plain-data `Device`/`Resource`), so
// tests attach drivers against fakes and the bare-metal kernel injects the
// real ISA implementations.
// =============================================================================

use crate::timer::{ClockFramework, TimerError};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

/// What a resource entry describes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ResourceKind {
    /// A range of I/O ports: `start` is the first port, `len` the count.
    IoPort,
    /// An interrupt line: `start` is the line number, `len` is 1.
    Irq,
}

/// One resource assigned to a device by the bus.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Resource {
    pub kind: ResourceKind,
    pub start: usize,
    pub len: usize,
}

impl Resource {
    pub const fn ioports(start: usize, len: usize) -> Resource {
        Resource {
            kind: ResourceKind::IoPort,
            start,
            len,
        }
    }

    pub const fn irq(line: usize) -> Resource {
        Resource {
            kind: ResourceKind::Irq,
            start: line,
            len: 1,
        }
    }
}

/// A device instance as handed to `Driver::probe`/`attach`.
pub struct Device {
    /// Unit number assigned during enumeration; drivers use it to tell
    /// apart multiple instances of the same hardware.
    pub unit: u32,
    resources: Vec<Resource>,
}

impl Device {
    pub fn new(unit: u32, resources: Vec<Resource>) -> Device {
        Device { unit, resources }
    }

    /// The `index`-th I/O port resource assigned to this device.
    pub fn take_ioports(&self, index: usize) -> Option<Resource> {
        self.nth_of_kind(ResourceKind::IoPort, index)
    }

    /// The `index`-th interrupt resource assigned to this device.
    pub fn take_irq(&self, index: usize) -> Option<Resource> {
        self.nth_of_kind(ResourceKind::Irq, index)
    }

    fn nth_of_kind(&self, kind: ResourceKind, index: usize) -> Option<Resource> {
        self.resources
            .iter()
            .filter(|r| r.kind == kind)
            .nth(index)
            .copied()
    }
}

/// Status codes for device attach.
///
/// Attach failures are ordinary errors, not panics: the device simply
/// stays unattached, with no partial state left behind.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeviceError {
    /// A required resource was not assigned to the device.
    ResourceMissing(ResourceKind, usize),
    /// The bus could not map a resource into the kernel's address space.
    MapFailed,
    /// The clock framework rejected the driver's timer descriptor.
    Timer(TimerError),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::ResourceMissing(kind, index) => {
                write!(f, "missing {kind:?} resource #{index}")
            }
            DeviceError::MapFailed => write!(f, "resource mapping failed"),
            DeviceError::Timer(err) => write!(f, "timer registration failed: {err}"),
        }
    }
}

impl From<TimerError> for DeviceError {
    fn from(err: TimerError) -> DeviceError {
        DeviceError::Timer(err)
    }
}

/// Register-level access to a device's resources.
pub trait Bus: Send + Sync {
    /// Makes a resource usable (e.g. maps MMIO). Port I/O needs no
    /// mapping, but drivers must still call this before touching
    /// registers so the bus can account the claim.
    fn map_resource(&self, dev: &Device, res: &Resource) -> Result<(), DeviceError>;

    /// Reads one byte at `offset` within the resource.
    fn read_1(&self, res: &Resource, offset: usize) -> u8;

    /// Writes one byte at `offset` within the resource.
    fn write_1(&self, res: &Resource, offset: usize, value: u8);
}

/// What an interrupt filter reports back to the dispatcher.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntrFilter {
    /// The interrupt came from this handler's device and was serviced.
    Handled,
    /// Not this device — the dispatcher should keep looking.
    Stray,
}

/// A driver's interrupt-level entry point.
///
/// Runs at interrupt context: no blocking, no sleep mutexes, keep it short.
pub trait IntrHandler: Send + Sync {
    fn filter(&self) -> IntrFilter;
}

/// The external interrupt controller, as seen from a driver.
pub trait IrqController: Send + Sync {
    /// Routes `irq` to `handler`. The controller holds the handler until
    /// `teardown_intr`.
    fn setup_intr(
        &self,
        dev: &Device,
        irq: &Resource,
        handler: Arc<dyn IntrHandler>,
        name: &'static str,
    );

    /// Removes the routing installed by `setup_intr`.
    fn teardown_intr(&self, dev: &Device, irq: &Resource);
}

/// The collaborators a driver needs at attach time, injected explicitly
/// by the device framework.
pub struct Services {
    pub bus: Arc<dyn Bus>,
    pub pic: Arc<dyn IrqController>,
    pub clock: Arc<dyn ClockFramework>,
}

/// Entry points the device framework calls for each driver.
pub trait Driver: Send + Sync {
    /// One-line description for boot logs.
    fn description(&self) -> &'static str;

    /// Whether this driver services the given device instance.
    fn probe(&self, dev: &Device) -> bool;

    /// Claims the device. On error the device stays unattached and the
    /// driver must leave no state behind.
    fn attach(&self, dev: &Arc<Device>, services: &Services) -> Result<(), DeviceError>;
}

// =============================================================================
// ISA port I/O bus (bare metal)
// =============================================================================

/// The legacy ISA bus: resources are x86 I/O port ranges, accessed with
/// IN/OUT instructions. Only meaningful on x86_64; hosted tests use fakes.
#[cfg(target_arch = "x86_64")]
pub struct IsaBus;

#[cfg(target_arch = "x86_64")]
impl Bus for IsaBus {
    fn map_resource(&self, _dev: &Device, res: &Resource) -> Result<(), DeviceError> {
        // Port I/O is always addressable; only the kind must match.
        match res.kind {
            ResourceKind::IoPort => Ok(()),
            ResourceKind::Irq => Err(DeviceError::MapFailed),
        }
    }

    fn read_1(&self, res: &Resource, offset: usize) -> u8 {
        assert!(offset < res.len, "port read outside resource range");
        let mut port = x86_64::instructions::port::Port::<u8>::new((res.start + offset) as u16);
        // SAFETY: the port lies inside a resource range the bus assigned
        // to this device; byte-wide reads of device registers have no
        // memory effects.
        unsafe { port.read() }
    }

    fn write_1(&self, res: &Resource, offset: usize, value: u8) {
        assert!(offset < res.len, "port write outside resource range");
        let mut port = x86_64::instructions::port::Port::<u8>::new((res.start + offset) as u16);
        // SAFETY: as for `read_1`; the device defines the register's
        // write semantics.
        unsafe { port.write(value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn resources_are_taken_by_kind_and_index() {
        let dev = Device::new(
            0,
            vec![
                Resource::ioports(0x40, 4),
                Resource::irq(0),
                Resource::ioports(0x61, 1),
            ],
        );

        assert_eq!(dev.take_ioports(0), Some(Resource::ioports(0x40, 4)));
        assert_eq!(dev.take_ioports(1), Some(Resource::ioports(0x61, 1)));
        assert_eq!(dev.take_ioports(2), None);
        assert_eq!(dev.take_irq(0), Some(Resource::irq(0)));
        assert_eq!(dev.take_irq(1), None);
    }
}
