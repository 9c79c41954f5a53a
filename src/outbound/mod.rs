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

//! The outbound SMTP client: the per-session dialogue and the dispatcher
//! that fans a message out across its recipients' domains.

mod send;
pub mod transact;

pub use send::{
    sendmail, SendGroup, SendHandle, SendOutcome, SendRequest,
};
