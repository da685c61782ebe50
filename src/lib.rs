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

//! Validate-and-repair sync of a local folder onto a serial-attached SD card.
//!
//! The device is asked, file by file, whether it holds each entry with the
//! declared size. Every entry it rejects is resent in transmit mode before
//! validation resumes with the remaining entries.

pub mod config;
pub mod device;
pub mod error;
pub mod files;
pub mod protocol;
pub mod sender;
pub mod serial;
pub mod validator;
