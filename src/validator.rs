// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::fmt;
use std::marker::PhantomData;
use std::time::{Duration, Instant};
use crate::config::SessionConfig;
use crate::error::{SessionError, TransferError};
use crate::files::FileEntry;
use crate::protocol::*;
use crate::sender::{announce, send_metadata, FileTransmitter, TransferStats};
use crate::serial::Transport;

// ============================================================================
// Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AnnounceValidate,
    SendMetadata,
    AwaitAck,
    RepairFile,
    ResumeValidate,
    Done,
    /// Standalone single-file transmit outside a sync session
    Upload,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::AnnounceValidate => "announce-validate",
            Phase::SendMetadata => "send-metadata",
            Phase::AwaitAck => "await-ack",
            Phase::RepairFile => "repair-file",
            Phase::ResumeValidate => "resume-validate",
            Phase::Done => "done",
            Phase::Upload => "upload",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub total: usize,
    /// Files the device confirmed without a transfer
    pub validated: usize,
    pub repaired: Vec<(String, TransferStats)>,
    pub elapsed: Duration,
}

// ============================================================================
// States
// ============================================================================

pub struct AnnounceValidate;
pub struct SendMetadata;
pub struct AwaitAck;
pub struct RepairFile;
pub struct ResumeValidate;

pub trait StateMarker: Send + 'static {
    const PHASE: Phase;
}

impl StateMarker for AnnounceValidate {
    const PHASE: Phase = Phase::AnnounceValidate;
}
impl StateMarker for SendMetadata {
    const PHASE: Phase = Phase::SendMetadata;
}
impl StateMarker for AwaitAck {
    const PHASE: Phase = Phase::AwaitAck;
}
impl StateMarker for RepairFile {
    const PHASE: Phase = Phase::RepairFile;
}
impl StateMarker for ResumeValidate {
    const PHASE: Phase = Phase::ResumeValidate;
}

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ValidatorFsm<State> {
    state: PhantomData<State>,
    transport: Transport,
    config: SessionConfig,
    files: Vec<FileEntry>,
    // Index of the entry being validated or repaired
    index: usize,
    mode: SessionMode,
    // Set while the current entry is being validated again after a repair
    revalidating: bool,
    started: Instant,
    report: SessionReport,
}

pub enum Transition {
    Next(Box<dyn ValidatorState>),
    Done(SessionReport),
}

// ============================================================================
// Trait
// ============================================================================

pub trait ValidatorState: Send {
    fn phase(&self) -> Phase;

    fn step(self: Box<Self>) -> Result<Transition, SessionError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S: StateMarker> ValidatorFsm<S> {
    fn transition<T: StateMarker>(self) -> Transition
    where
        ValidatorFsm<T>: ValidatorState,
    {
        Transition::Next(Box::new(ValidatorFsm::<T> {
            state: PhantomData,
            transport: self.transport,
            config: self.config,
            files: self.files,
            index: self.index,
            mode: self.mode,
            revalidating: self.revalidating,
            started: self.started,
            report: self.report,
        }))
    }

    /// Next entry, or the end of the session once every entry is settled
    fn advance(self) -> Transition {
        if self.index >= self.files.len() {
            self.finish()
        } else {
            self.transition::<SendMetadata>()
        }
    }

    fn finish(self) -> Transition {
        let mut report = self.report;
        report.elapsed = self.started.elapsed();
        log::trace!("Entering {}", Phase::Done);
        Transition::Done(report)
    }

    fn current(&self) -> &FileEntry {
        &self.files[self.index]
    }

    fn error(&self, source: TransferError) -> SessionError {
        SessionError {
            phase: S::PHASE,
            mode: self.mode,
            file: self.files.get(self.index).map(|f| f.relative_path.clone()),
            source,
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ValidatorState for ValidatorFsm<AnnounceValidate> {
    fn phase(&self) -> Phase {
        Phase::AnnounceValidate
    }

    fn step(self: Box<Self>) -> Result<Transition, SessionError> {
        let mut fsm = *self;
        let total = fsm.files.len() as u32;
        log::info!("Validating {} files", total);

        if let Err(e) = announce(&mut fsm.transport, SessionMode::Validate, total, &fsm.config.pacing) {
            return Err(fsm.error(e));
        }
        Ok(fsm.advance())
    }
}

impl ValidatorState for ValidatorFsm<SendMetadata> {
    fn phase(&self) -> Phase {
        Phase::SendMetadata
    }

    fn step(self: Box<Self>) -> Result<Transition, SessionError> {
        let mut fsm = *self;

        if let Err(e) = send_metadata(&mut fsm.transport, &fsm.files[fsm.index], &fsm.config.pacing) {
            return Err(fsm.error(e));
        }
        Ok(fsm.transition::<AwaitAck>())
    }
}

impl ValidatorState for ValidatorFsm<AwaitAck> {
    fn phase(&self) -> Phase {
        Phase::AwaitAck
    }

    fn step(self: Box<Self>) -> Result<Transition, SessionError> {
        let mut fsm = *self;

        let ack = match fsm.transport.read_byte().and_then(|b| decode_ack(b).map_err(TransferError::from)) {
            Ok(ack) => ack,
            Err(e) => return Err(fsm.error(e)),
        };

        let position = fsm.index + 1;
        let total = fsm.files.len();

        if ack.is_success() {
            log::info!("{}/{} validated: {}", position, total, fsm.current().relative_path);
            if !fsm.revalidating {
                fsm.report.validated += 1;
            }
            fsm.revalidating = false;
            fsm.index += 1;
            return Ok(fsm.advance());
        }

        if fsm.revalidating {
            // Accepted in transmit mode but still rejected in validate mode
            return Err(fsm.error(TransferError::RepairRejected(ack)));
        }

        log::warn!("{}/{} failed validation ({}): {}", position, total, ack, fsm.current().relative_path);
        Ok(fsm.transition::<RepairFile>())
    }
}

impl ValidatorState for ValidatorFsm<RepairFile> {
    fn phase(&self) -> Phase {
        Phase::RepairFile
    }

    fn step(self: Box<Self>) -> Result<Transition, SessionError> {
        let mut fsm = *self;
        fsm.mode = SessionMode::Transmit;

        let entry = fsm.current().clone();
        let remaining = fsm.files.len() - fsm.index - 1;

        let result = fsm.transport
            .pause(fsm.config.pacing.after_repair)
            .and_then(|_| announce(&mut fsm.transport, SessionMode::Transmit, 1, &fsm.config.pacing))
            .and_then(|_| FileTransmitter::new(&fsm.config).send(&mut fsm.transport, &entry, remaining));

        match result {
            Ok(stats) => {
                fsm.report.repaired.push((entry.relative_path, stats));
                Ok(fsm.transition::<ResumeValidate>())
            }
            Err(e) => Err(fsm.error(e)),
        }
    }
}

impl ValidatorState for ValidatorFsm<ResumeValidate> {
    fn phase(&self) -> Phase {
        Phase::ResumeValidate
    }

    fn step(self: Box<Self>) -> Result<Transition, SessionError> {
        let mut fsm = *self;
        fsm.mode = SessionMode::Validate;

        if fsm.config.revalidate_repaired {
            fsm.revalidating = true;
        } else {
            fsm.index += 1;
        }
        let count = (fsm.files.len() - fsm.index) as u32;

        let result = fsm.transport
            .pause(fsm.config.pacing.after_repair)
            .and_then(|_| announce(&mut fsm.transport, SessionMode::Validate, count, &fsm.config.pacing));

        match result {
            Ok(()) => Ok(fsm.advance()),
            Err(e) => Err(fsm.error(e)),
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl ValidatorFsm<AnnounceValidate> {
    pub fn new(transport: Transport, files: Vec<FileEntry>, config: SessionConfig) -> Box<dyn ValidatorState> {
        let report = SessionReport {
            total: files.len(),
            ..SessionReport::default()
        };
        Box::new(ValidatorFsm {
            state: PhantomData::<AnnounceValidate>,
            transport,
            config,
            files,
            index: 0,
            mode: SessionMode::Validate,
            revalidating: false,
            started: Instant::now(),
            report,
        })
    }
}

/// Validate every entry on the device and repair the ones it rejects.
/// The transport is closed when this returns, on success or failure.
pub fn run(transport: Transport, files: Vec<FileEntry>, config: &SessionConfig) -> Result<SessionReport, SessionError> {
    let mut state = ValidatorFsm::<AnnounceValidate>::new(transport, files, config.clone());
    loop {
        log::trace!("Entering {}", state.phase());
        match state.step()? {
            Transition::Next(next) => state = next,
            Transition::Done(report) => return Ok(report),
        }
    }
}

/// Transmit a single file outside a sync session
pub fn transmit_one(mut transport: Transport, entry: &FileEntry, config: &SessionConfig) -> Result<TransferStats, SessionError> {
    let context = |source| SessionError {
        phase: Phase::Upload,
        mode: SessionMode::Transmit,
        file: Some(entry.relative_path.clone()),
        source,
    };

    announce(&mut transport, SessionMode::Transmit, 1, &config.pacing).map_err(context)?;
    FileTransmitter::new(config).send(&mut transport, entry, 0).map_err(context)
}

// ============================================================================
// Tests
// ============================================================================
