//-
// Copyright (c) 2026, the Martlet developers
//
// This file is part of Martlet.
//
// Martlet is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Martlet is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the GNU  General Public  License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Martlet. If not, see <http://www.gnu.org/licenses/>.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Tracks text that should be included at the start of every log statement
/// for one connection.
///
/// Clones of a `LogPrefix` share the same underlying data.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone)]
struct Inner {
    protocol: &'static str,
    peer: Option<String>,
    helo: Option<String>,
}

impl LogPrefix {
    pub fn new(protocol: &'static str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                protocol,
                peer: None,
                helo: None,
            })),
        }
    }

    pub fn set_peer(&self, peer: String) {
        self.inner.lock().unwrap().peer = Some(peer);
    }

    pub fn set_helo(&self, helo: String) {
        self.inner.lock().unwrap().helo = Some(helo);
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        write!(f, "{}", inner.protocol)?;
        if let Some(ref peer) = inner.peer {
            write!(f, "[{}", peer)?;
            if let Some(ref helo) = inner.helo {
                write!(f, " {}", helo)?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prefix_formatting() {
        let prefix = LogPrefix::new("smtp-in");
        assert_eq!("smtp-in", prefix.to_string());

        prefix.set_peer("192.0.2.1:3120".to_owned());
        assert_eq!("smtp-in[192.0.2.1:3120]", prefix.to_string());

        prefix.set_helo("mail.example.com".to_owned());
        assert_eq!(
            "smtp-in[192.0.2.1:3120 mail.example.com]",
            prefix.to_string(),
        );
    }

    #[test]
    fn clones_share_state() {
        let prefix = LogPrefix::new("smtp-out");
        let clone = prefix.clone();
        prefix.set_peer("peer".to_owned());
        assert_eq!("smtp-out[peer]", clone.to_string());
    }
}
