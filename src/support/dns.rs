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

pub use hickory_resolver::Name;

use crate::support::error::Error;

pub type Resolver = hickory_resolver::AsyncResolver<
    hickory_resolver::name_server::GenericConnector<
        hickory_resolver::name_server::TokioRuntimeProvider,
    >,
>;

/// Creates a resolver from the operating system's DNS configuration.
pub fn system_resolver() -> Result<Resolver, Error> {
    hickory_resolver::TokioAsyncResolver::tokio_from_system_conf()
        .map_err(|e| Error::DnsConfig(e.to_string()))
}

/// Looks up the mail exchanges for `domain`.
///
/// The answer is sorted ascending by preference; equal preferences keep the
/// answer order. An empty answer is reported as `NoMxRecords`: every
/// recipient behind `domain` is undeliverable.
pub async fn resolve_mx(
    resolver: &Resolver,
    domain: &str,
) -> Result<Vec<String>, Error> {
    use hickory_resolver::error::ResolveErrorKind as Rek;

    let answer = match resolver.mx_lookup(domain).await {
        Ok(answer) => answer,
        Err(e) => {
            return Err(match *e.kind() {
                Rek::NoRecordsFound { .. } => {
                    Error::NoMxRecords(domain.to_owned())
                },
                _ => Error::DnsLookup(domain.to_owned()),
            });
        },
    };

    let records = answer
        .iter()
        .map(|mx| (mx.preference(), exchange_host(mx.exchange())))
        .collect::<Vec<_>>();
    if records.is_empty() {
        return Err(Error::NoMxRecords(domain.to_owned()));
    }

    Ok(sort_by_preference(records))
}

/// Orders MX answers ascending by preference, keeping the answer order for
/// equal preferences.
fn sort_by_preference(mut records: Vec<(u16, String)>) -> Vec<String> {
    records.sort_by_key(|&(preference, _)| preference);
    records.into_iter().map(|(_, host)| host).collect()
}

fn exchange_host(name: &Name) -> String {
    let host = name.to_ascii();
    host.strip_suffix('.').unwrap_or(&host).to_owned()
}
