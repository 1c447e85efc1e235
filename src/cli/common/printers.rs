// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Deferred warnings for argument handling. Parameter resolution collects
//! its complaints here so they come out in one block, after the banner and
//! before the pipeline starts.

use std::{borrow::Cow, sync::Mutex};

const VERTICAL_AND_RIGHT: char = '├';
const UP_AND_RIGHT: char = '└';

lazy_static::lazy_static! {
    static ref COLLECTED: Mutex<Vec<Cow<'static, str>>> = Mutex::new(vec![]);
}

pub(crate) trait Warn {
    fn warn(self);
}

impl Warn for &'static str {
    fn warn(self) {
        COLLECTED.lock().unwrap().push(self.into());
    }
}

impl Warn for String {
    fn warn(self) {
        COLLECTED.lock().unwrap().push(self.into());
    }
}

/// Print out any warnings collected while arguments were resolved. Call once
/// after parameter resolution.
pub(crate) fn display_warnings() {
    let mut lines = COLLECTED.lock().unwrap();
    if lines.is_empty() {
        return;
    }
    log::warn!("{}", console::style("Warnings").bold());
    let num_lines = lines.len();
    for (i, line) in lines.drain(..).enumerate() {
        let symbol = if i + 1 == num_lines {
            UP_AND_RIGHT
        } else {
            VERTICAL_AND_RIGHT
        };
        log::warn!("{symbol} {line}");
    }
    log::warn!("");
}
