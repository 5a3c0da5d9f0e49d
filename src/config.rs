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

//! Timing and retry policy shared by both engines

use std::time::Duration;

/// Tunable protocol timings. `Config::default()` holds the standard values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// How long the sender waits for the receiver's initial NAK
    pub connect_timeout: Duration,
    /// Sender pause between unsuccessful polls for the initial NAK
    pub connect_poll: Duration,
    /// How long the sender waits for a block acknowledgment
    pub ack_timeout: Duration,
    /// Sender delay before each poll while data remains
    pub ack_poll: Duration,
    /// How long the sender keeps offering EOT before giving up
    pub eot_ack_timeout: Duration,
    /// Sender delay before each poll once EOT has been sent
    pub eot_poll: Duration,
    /// Consecutive NAKs (sender) or silent windows (receiver) tolerated
    pub max_retries: u32,
    /// Receiver delay before each poll while waiting for a block
    pub receive_poll: Duration,
    /// Receiver polls per window before it re-requests transmission
    pub receive_attempts: u32,
    /// Receiver delay between polls while completing a partial block
    pub reassembly_poll: Duration,
    /// Longest the receiver waits for the rest of a partial block
    pub reassembly_timeout: Duration,
    /// Drop trailing SUB padding from the last received block
    pub strip_padding: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            connect_timeout: Duration::from_secs(60),
            connect_poll: Duration::from_millis(800),
            ack_timeout: Duration::from_secs(60),
            ack_poll: Duration::from_millis(150),
            eot_ack_timeout: Duration::from_secs(60),
            eot_poll: Duration::from_millis(1500),
            max_retries: 10,
            receive_poll: Duration::from_millis(300),
            receive_attempts: 34,
            reassembly_poll: Duration::from_millis(50),
            reassembly_timeout: Duration::from_millis(300 * 34),
            strip_padding: true,
        }
    }
}

impl Config {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_strip_padding(mut self, strip_padding: bool) -> Self {
        self.strip_padding = strip_padding;
        self
    }

    /// Length of one receiver polling window
    pub fn receive_window(&self) -> Duration {
        self.receive_poll * self.receive_attempts
    }
}
