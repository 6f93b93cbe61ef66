//! Room resolution: which group a connection joins and a publisher targets.
//!
//! Each WebSocket route maps to exactly one [`RoomKind`]. The kind decides
//! which route parameter carries the entity id and how the group key is
//! rendered, so `contracts` and `contracts-client` never collide even though
//! they share a prefix.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::GatewayError;

/// The fixed set of room kinds the relay serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    Leads,
    Client,
    Contracts,
    ContractsClient,
    Payments,
    PaymentsClient,
    PaymentsContract,
    Comments,
}

impl RoomKind {
    pub const ALL: [RoomKind; 8] = [
        RoomKind::Leads,
        RoomKind::Client,
        RoomKind::Contracts,
        RoomKind::ContractsClient,
        RoomKind::Payments,
        RoomKind::PaymentsClient,
        RoomKind::PaymentsContract,
        RoomKind::Comments,
    ];

    /// The literal used in group keys and publish URLs.
    pub fn as_str(self) -> &'static str {
        match self {
            RoomKind::Leads => "leads",
            RoomKind::Client => "client",
            RoomKind::Contracts => "contracts",
            RoomKind::ContractsClient => "contracts-client",
            RoomKind::Payments => "payments",
            RoomKind::PaymentsClient => "payments-client",
            RoomKind::PaymentsContract => "payments-contract",
            RoomKind::Comments => "comments",
        }
    }

    /// Route parameter holding the entity id, or `None` for global rooms.
    pub fn id_param(self) -> Option<&'static str> {
        match self {
            RoomKind::Leads => Some("lead_id"),
            RoomKind::Client | RoomKind::ContractsClient | RoomKind::PaymentsClient => {
                Some("client_id")
            }
            RoomKind::PaymentsContract => Some("contract_id"),
            RoomKind::Contracts | RoomKind::Payments | RoomKind::Comments => None,
        }
    }

    /// Separator between the kind literal and the id in scoped group keys.
    fn separator(self) -> char {
        match self {
            RoomKind::Leads | RoomKind::Client => '_',
            _ => '-',
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoomKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| GatewayError::InvalidRoute(format!("unknown room kind `{s}`")))
    }
}

/// A resolved room: the kind plus whatever id it is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Leads { lead_id: u64 },
    Client { client_id: u64 },
    Contracts,
    ContractsClient { client_id: u64 },
    Payments,
    PaymentsClient { client_id: u64 },
    PaymentsContract { contract_id: u64 },
    Comments,
}

impl Room {
    /// Resolve a room from the parameters of the route that matched.
    ///
    /// Global kinds ignore `params` entirely. Scoped kinds require their id
    /// parameter in canonical decimal form.
    pub fn resolve(kind: RoomKind, params: &HashMap<String, String>) -> Result<Self, GatewayError> {
        let id = |param: &str| -> Result<u64, GatewayError> {
            let raw = params.get(param).ok_or_else(|| {
                GatewayError::InvalidRoute(format!("missing route parameter `{param}`"))
            })?;
            parse_entity_id(param, raw)
        };

        let room = match kind {
            RoomKind::Leads => Room::Leads { lead_id: id("lead_id")? },
            RoomKind::Client => Room::Client { client_id: id("client_id")? },
            RoomKind::Contracts => Room::Contracts,
            RoomKind::ContractsClient => Room::ContractsClient { client_id: id("client_id")? },
            RoomKind::Payments => Room::Payments,
            RoomKind::PaymentsClient => Room::PaymentsClient { client_id: id("client_id")? },
            RoomKind::PaymentsContract => Room::PaymentsContract {
                contract_id: id("contract_id")?,
            },
            RoomKind::Comments => Room::Comments,
        };
        Ok(room)
    }

    /// Parse a rendered group key back into its room.
    ///
    /// Only keys this module could have produced are accepted.
    pub fn from_group_key(key: &str) -> Result<Self, GatewayError> {
        for kind in RoomKind::ALL {
            let Some(rest) = key.strip_prefix(kind.as_str()) else {
                continue;
            };
            match kind.id_param() {
                None if rest.is_empty() => return Room::resolve(kind, &HashMap::new()),
                None => continue,
                Some(param) => {
                    let Some(raw) = rest.strip_prefix(kind.separator()) else {
                        continue;
                    };
                    if parse_entity_id(param, raw).is_err() {
                        continue;
                    }
                    let params = HashMap::from([(param.to_string(), raw.to_string())]);
                    return Room::resolve(kind, &params);
                }
            }
        }
        Err(GatewayError::InvalidRoute(format!("`{key}` is not a known group key")))
    }

    pub fn kind(&self) -> RoomKind {
        match self {
            Room::Leads { .. } => RoomKind::Leads,
            Room::Client { .. } => RoomKind::Client,
            Room::Contracts => RoomKind::Contracts,
            Room::ContractsClient { .. } => RoomKind::ContractsClient,
            Room::Payments => RoomKind::Payments,
            Room::PaymentsClient { .. } => RoomKind::PaymentsClient,
            Room::PaymentsContract { .. } => RoomKind::PaymentsContract,
            Room::Comments => RoomKind::Comments,
        }
    }

    pub fn entity_id(&self) -> Option<u64> {
        match *self {
            Room::Leads { lead_id } => Some(lead_id),
            Room::Client { client_id }
            | Room::ContractsClient { client_id }
            | Room::PaymentsClient { client_id } => Some(client_id),
            Room::PaymentsContract { contract_id } => Some(contract_id),
            Room::Contracts | Room::Payments | Room::Comments => None,
        }
    }

    pub fn group_key(&self) -> GroupKey {
        let kind = self.kind();
        match self.entity_id() {
            None => GroupKey(kind.as_str().to_string()),
            Some(id) => GroupKey(format!("{}{}{}", kind.as_str(), kind.separator(), id)),
        }
    }
}

/// The string every subscriber and publisher of a room agrees on.
///
/// Only produced by [`Room::group_key`], so a value of this type is always a
/// well-formed key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accept ASCII digits only, no sign, and no leading zeros other than "0".
fn parse_entity_id(param: &str, raw: &str) -> Result<u64, GatewayError> {
    let canonical = !raw.is_empty()
        && raw.bytes().all(|b| b.is_ascii_digit())
        && (raw == "0" || !raw.starts_with('0'));
    if !canonical {
        return Err(GatewayError::InvalidRoute(format!(
            "route parameter `{param}` must be a decimal id, got {raw:?}"
        )));
    }
    raw.parse().map_err(|_| {
        GatewayError::InvalidRoute(format!("route parameter `{param}` is out of range"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn key(kind: RoomKind, pairs: &[(&str, &str)]) -> String {
        Room::resolve(kind, &params(pairs))
            .unwrap()
            .group_key()
            .to_string()
    }

    fn assert_invalid(kind: RoomKind, pairs: &[(&str, &str)]) {
        match Room::resolve(kind, &params(pairs)) {
            Err(GatewayError::InvalidRoute(_)) => {}
            other => panic!("expected InvalidRoute for {kind} {pairs:?}, got {other:?}"),
        }
    }

    #[test]
    fn lead_room_uses_underscore() {
        assert_eq!(key(RoomKind::Leads, &[("lead_id", "42")]), "leads_42");
    }

    #[test]
    fn lead_room_requires_id() {
        assert_invalid(RoomKind::Leads, &[]);
    }

    #[test]
    fn client_scoped_contracts_use_dash() {
        assert_eq!(
            key(RoomKind::ContractsClient, &[("client_id", "7")]),
            "contracts-client-7"
        );
    }

    #[test]
    fn global_rooms_ignore_params() {
        assert_eq!(key(RoomKind::Comments, &[]), "comments");
        assert_eq!(key(RoomKind::Comments, &[("lead_id", "9")]), "comments");
        assert_eq!(key(RoomKind::Contracts, &[("client_id", "abc")]), "contracts");
        assert_eq!(key(RoomKind::Payments, &[]), "payments");
    }

    #[test]
    fn every_scoped_kind_renders_its_key() {
        assert_eq!(key(RoomKind::Client, &[("client_id", "3")]), "client_3");
        assert_eq!(
            key(RoomKind::PaymentsClient, &[("client_id", "3")]),
            "payments-client-3"
        );
        assert_eq!(
            key(RoomKind::PaymentsContract, &[("contract_id", "11")]),
            "payments-contract-11"
        );
    }

    #[test]
    fn resolution_is_deterministic() {
        for id in ["0", "1", "42", "18446744073709551615"] {
            let first = key(RoomKind::Leads, &[("lead_id", id)]);
            let second = key(RoomKind::Leads, &[("lead_id", id)]);
            assert_eq!(first, second);
            assert_eq!(first, format!("leads_{id}"));
        }
    }

    #[test]
    fn rejects_non_canonical_ids() {
        for raw in ["", "abc", "-1", "+1", "4.2", " 42", "042", "00", "18446744073709551616"] {
            assert_invalid(RoomKind::Leads, &[("lead_id", raw)]);
        }
    }

    #[test]
    fn wrong_param_name_is_missing() {
        assert_invalid(RoomKind::PaymentsContract, &[("client_id", "5")]);
    }

    #[test]
    fn kind_literals_round_trip_through_from_str() {
        for kind in RoomKind::ALL {
            assert_eq!(kind.as_str().parse::<RoomKind>().unwrap(), kind);
        }
        assert!("lead".parse::<RoomKind>().is_err());
    }

    #[test]
    fn group_keys_parse_back_to_their_room() {
        let rooms = [
            Room::Leads { lead_id: 42 },
            Room::Client { client_id: 7 },
            Room::Contracts,
            Room::ContractsClient { client_id: 7 },
            Room::Payments,
            Room::PaymentsClient { client_id: 0 },
            Room::PaymentsContract { contract_id: 9 },
            Room::Comments,
        ];
        for room in rooms {
            let key = room.group_key();
            assert_eq!(Room::from_group_key(key.as_str()).unwrap(), room);
        }
    }

    #[test]
    fn foreign_group_keys_are_rejected() {
        for raw in ["leads", "leads-4", "leads_", "contracts_3", "comments_1", "contracts-client", "chat"] {
            assert!(Room::from_group_key(raw).is_err(), "{raw} should not parse");
        }
    }
}
