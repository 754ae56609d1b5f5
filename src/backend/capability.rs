use std::fmt;

use bitflags::bitflags;
use log::{debug, warn};

use crate::error::CbmError;

bitflags! {
    /// Operations a backend may export.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Exports: u64 {
        const DRIVER_NAME = 1 << 0;
        const DRIVER_OPEN = 1 << 1;
        const DRIVER_CLOSE = 1 << 2;
        const RAW_WRITE = 1 << 3;
        const RAW_READ = 1 << 4;
        const OPEN = 1 << 5;
        const CLOSE = 1 << 6;
        const LISTEN = 1 << 7;
        const TALK = 1 << 8;
        const UNLISTEN = 1 << 9;
        const UNTALK = 1 << 10;
        const GET_EOI = 1 << 11;
        const CLEAR_EOI = 1 << 12;
        const RESET = 1 << 13;
        const IEC_POLL = 1 << 14;
        const IEC_SETRELEASE = 1 << 15;
        const IEC_WAIT = 1 << 16;

        const INIT = 1 << 17;
        const UNINIT = 1 << 18;
        const LOCK = 1 << 19;
        const UNLOCK = 1 << 20;
        const IEC_SET = 1 << 21;
        const IEC_RELEASE = 1 << 22;

        const PARALLEL_BURST_READ = 1 << 23;
        const PARALLEL_BURST_WRITE = 1 << 24;
        const PARALLEL_BURST_READ_TRACK = 1 << 25;
        const PARALLEL_BURST_WRITE_TRACK = 1 << 26;

        const PP_READ = 1 << 27;
        const PP_WRITE = 1 << 28;

        const SRQ_BURST_READ = 1 << 29;
        const SRQ_BURST_WRITE = 1 << 30;
        const SRQ_BURST_READ_TRACK = 1 << 31;
        const SRQ_BURST_WRITE_TRACK = 1 << 32;

        const TAP_PREPARE_CAPTURE = 1 << 33;
        const TAP_PREPARE_WRITE = 1 << 34;
        const TAP_GET_SENSE = 1 << 35;
        const TAP_WAIT_FOR_STOP_SENSE = 1 << 36;
        const TAP_WAIT_FOR_PLAY_SENSE = 1 << 37;
        const TAP_MOTOR_ON = 1 << 38;
        const TAP_MOTOR_OFF = 1 << 39;
        const TAP_START_CAPTURE = 1 << 40;
        const TAP_START_WRITE = 1 << 41;
        const TAP_GET_VER = 1 << 42;
        const TAP_DOWNLOAD_CONFIG = 1 << 43;
        const TAP_UPLOAD_CONFIG = 1 << 44;
        const TAP_BREAK = 1 << 45;
    }
}

impl Exports {
    /// Operations without which a backend cannot be used at all.
    pub const MANDATORY: Exports = Exports::from_bits_retain(
        Exports::DRIVER_NAME.bits()
            | Exports::DRIVER_OPEN.bits()
            | Exports::DRIVER_CLOSE.bits()
            | Exports::RAW_WRITE.bits()
            | Exports::RAW_READ.bits()
            | Exports::OPEN.bits()
            | Exports::CLOSE.bits()
            | Exports::LISTEN.bits()
            | Exports::TALK.bits()
            | Exports::UNLISTEN.bits()
            | Exports::UNTALK.bits()
            | Exports::GET_EOI.bits()
            | Exports::CLEAR_EOI.bits()
            | Exports::RESET.bits()
            | Exports::IEC_POLL.bits()
            | Exports::IEC_SETRELEASE.bits()
            | Exports::IEC_WAIT.bits(),
    );

    /// Operations that may be present or absent individually.
    pub const LOOSE: Exports = Exports::from_bits_retain(
        Exports::INIT.bits()
            | Exports::UNINIT.bits()
            | Exports::LOCK.bits()
            | Exports::UNLOCK.bits()
            | Exports::IEC_SET.bits()
            | Exports::IEC_RELEASE.bits(),
    );

    pub const PARALLEL_BURST: Exports = Exports::from_bits_retain(
        Exports::PARALLEL_BURST_READ.bits()
            | Exports::PARALLEL_BURST_WRITE.bits()
            | Exports::PARALLEL_BURST_READ_TRACK.bits()
            | Exports::PARALLEL_BURST_WRITE_TRACK.bits(),
    );

    pub const PARALLEL_PORT: Exports =
        Exports::from_bits_retain(Exports::PP_READ.bits() | Exports::PP_WRITE.bits());

    pub const SRQ_BURST: Exports = Exports::from_bits_retain(
        Exports::SRQ_BURST_READ.bits()
            | Exports::SRQ_BURST_WRITE.bits()
            | Exports::SRQ_BURST_READ_TRACK.bits()
            | Exports::SRQ_BURST_WRITE_TRACK.bits(),
    );

    pub const TAPE: Exports = Exports::from_bits_retain(
        Exports::TAP_PREPARE_CAPTURE.bits()
            | Exports::TAP_PREPARE_WRITE.bits()
            | Exports::TAP_GET_SENSE.bits()
            | Exports::TAP_WAIT_FOR_STOP_SENSE.bits()
            | Exports::TAP_WAIT_FOR_PLAY_SENSE.bits()
            | Exports::TAP_MOTOR_ON.bits()
            | Exports::TAP_MOTOR_OFF.bits()
            | Exports::TAP_START_CAPTURE.bits()
            | Exports::TAP_START_WRITE.bits()
            | Exports::TAP_GET_VER.bits()
            | Exports::TAP_DOWNLOAD_CONFIG.bits()
            | Exports::TAP_UPLOAD_CONFIG.bits()
            | Exports::TAP_BREAK.bits(),
    );
}

/// An all-or-nothing set of optional operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeatureGroup {
    ParallelBurst,
    ParallelPort,
    SrqBurst,
    Tape,
}

impl FeatureGroup {
    pub const ALL: [FeatureGroup; 4] = [
        FeatureGroup::ParallelBurst,
        FeatureGroup::ParallelPort,
        FeatureGroup::SrqBurst,
        FeatureGroup::Tape,
    ];

    pub fn operations(self) -> Exports {
        match self {
            FeatureGroup::ParallelBurst => Exports::PARALLEL_BURST,
            FeatureGroup::ParallelPort => Exports::PARALLEL_PORT,
            FeatureGroup::SrqBurst => Exports::SRQ_BURST,
            FeatureGroup::Tape => Exports::TAPE,
        }
    }
}

impl fmt::Display for FeatureGroup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            FeatureGroup::ParallelBurst => "parallel burst",
            FeatureGroup::ParallelPort => "parallel port",
            FeatureGroup::SrqBurst => "SRQ burst",
            FeatureGroup::Tape => "tape",
        })
    }
}

/// Which optional groups a resolved backend provides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Features {
    pub parallel_burst: bool,
    pub parallel_port: bool,
    pub srq_burst: bool,
    pub tape: bool,
}

impl Features {
    pub fn has(&self, group: FeatureGroup) -> bool {
        match group {
            FeatureGroup::ParallelBurst => self.parallel_burst,
            FeatureGroup::ParallelPort => self.parallel_port,
            FeatureGroup::SrqBurst => self.srq_burst,
            FeatureGroup::Tape => self.tape,
        }
    }

    fn set(&mut self, group: FeatureGroup) {
        match group {
            FeatureGroup::ParallelBurst => self.parallel_burst = true,
            FeatureGroup::ParallelPort => self.parallel_port = true,
            FeatureGroup::SrqBurst => self.srq_burst = true,
            FeatureGroup::Tape => self.tape = true,
        }
    }

    pub fn groups(&self) -> impl Iterator<Item = FeatureGroup> + '_ {
        FeatureGroup::ALL
            .iter()
            .copied()
            .filter(move |&group| self.has(group))
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for group in self.groups() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}", group)?;
            first = false;
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

/// Check an export set: all mandatory operations must be present, and each
/// optional group must be either complete or entirely absent.
pub fn validate(exports: Exports) -> Result<Features, CbmError> {
    if !exports.contains(Exports::MANDATORY) {
        warn!(
            "backend lacks mandatory operations {:?}",
            Exports::MANDATORY.difference(exports)
        );
        return Err(CbmError::BackendIncomplete);
    }

    let mut features = Features::default();
    for group in FeatureGroup::ALL {
        let wanted = group.operations();
        let present = exports.intersection(wanted);
        if present.is_empty() {
            continue;
        }
        if present != wanted {
            warn!(
                "backend provides only part of the {} group, missing {:?}",
                group,
                wanted.difference(present)
            );
            return Err(CbmError::BackendInconsistent);
        }
        features.set(group);
    }
    debug!("backend features: {}", features);
    Ok(features)
}
