// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Test-only facility implementations.

#[cfg(test)]
pub mod fake_facility;
