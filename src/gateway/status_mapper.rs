use std::collections::HashMap;

use crate::models::{ChargeStatus, RefundStatus};

/// Outcome of interpreting a gateway status token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretedStatus {
    Charge(ChargeStatus),
    Refund(RefundStatus),
    /// Known token the connector deliberately does not act on.
    Ignored,
    /// Token absent from the mapping table, or a current-status-qualified
    /// mapping whose qualifier did not match.
    Unknown,
}

#[derive(Debug, Clone)]
enum Mapping {
    Ignore,
    Charge(ChargeStatus),
    Refund(RefundStatus),
    ChargeWhenCurrent {
        current: ChargeStatus,
        to: ChargeStatus,
    },
}

/// Pure mapping from provider status tokens to interpreted outcomes.
///
/// A token can carry several current-status-qualified mappings (e.g. a
/// provider's single CANCELLED token resolving to user- or system-cancelled
/// depending on which cancel flow is in flight).
#[derive(Debug, Clone, Default)]
pub struct StatusMapper {
    mappings: HashMap<String, Vec<Mapping>>,
}

impl StatusMapper {
    pub fn builder() -> StatusMapperBuilder {
        StatusMapperBuilder {
            mapper: StatusMapper::default(),
        }
    }

    pub fn from_token(&self, token: &str, current: Option<ChargeStatus>) -> InterpretedStatus {
        let Some(mappings) = self.mappings.get(token) else {
            return InterpretedStatus::Unknown;
        };
        for mapping in mappings {
            match mapping {
                Mapping::Ignore => return InterpretedStatus::Ignored,
                Mapping::Charge(status) => return InterpretedStatus::Charge(*status),
                Mapping::Refund(status) => return InterpretedStatus::Refund(*status),
                Mapping::ChargeWhenCurrent { current: qualifier, to } => {
                    if current == Some(*qualifier) {
                        return InterpretedStatus::Charge(*to);
                    }
                }
            }
        }
        InterpretedStatus::Unknown
    }
}

pub struct StatusMapperBuilder {
    mapper: StatusMapper,
}

impl StatusMapperBuilder {
    pub fn ignore(mut self, token: &str) -> Self {
        self.push(token, Mapping::Ignore);
        self
    }

    pub fn map_charge(mut self, token: &str, status: ChargeStatus) -> Self {
        self.push(token, Mapping::Charge(status));
        self
    }

    pub fn map_refund(mut self, token: &str, status: RefundStatus) -> Self {
        self.push(token, Mapping::Refund(status));
        self
    }

    pub fn map_charge_when(
        mut self,
        token: &str,
        current: ChargeStatus,
        to: ChargeStatus,
    ) -> Self {
        self.push(token, Mapping::ChargeWhenCurrent { current, to });
        self
    }

    pub fn build(self) -> StatusMapper {
        self.mapper
    }

    fn push(&mut self, token: &str, mapping: Mapping) {
        self.mapper
            .mappings
            .entry(token.to_string())
            .or_default()
            .push(mapping);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> StatusMapper {
        StatusMapper::builder()
            .ignore("IGNORED_STATUS")
            .map_charge("CAPTURED_TOKEN", ChargeStatus::Captured)
            .map_refund("REFUNDED_TOKEN", RefundStatus::Refunded)
            .map_charge_when(
                "CANCELLED_TOKEN",
                ChargeStatus::UserCancelSubmitted,
                ChargeStatus::UserCancelled,
            )
            .map_charge_when(
                "CANCELLED_TOKEN",
                ChargeStatus::SystemCancelSubmitted,
                ChargeStatus::SystemCancelled,
            )
            .build()
    }

    #[test]
    fn ignored_token_is_ignored_with_or_without_current_status() {
        let m = mapper();
        assert_eq!(
            m.from_token("IGNORED_STATUS", Some(ChargeStatus::AuthorisationSuccess)),
            InterpretedStatus::Ignored
        );
        assert_eq!(m.from_token("IGNORED_STATUS", None), InterpretedStatus::Ignored);
    }

    #[test]
    fn unconditional_charge_mapping_disregards_current_status() {
        let m = mapper();
        assert_eq!(
            m.from_token("CAPTURED_TOKEN", Some(ChargeStatus::CaptureSubmitted)),
            InterpretedStatus::Charge(ChargeStatus::Captured)
        );
        assert_eq!(
            m.from_token("CAPTURED_TOKEN", None),
            InterpretedStatus::Charge(ChargeStatus::Captured)
        );
    }

    #[test]
    fn refund_mapping_yields_refund_status() {
        assert_eq!(
            mapper().from_token("REFUNDED_TOKEN", Some(ChargeStatus::Captured)),
            InterpretedStatus::Refund(RefundStatus::Refunded)
        );
    }

    #[test]
    fn qualified_mapping_selects_by_current_status() {
        let m = mapper();
        assert_eq!(
            m.from_token("CANCELLED_TOKEN", Some(ChargeStatus::SystemCancelSubmitted)),
            InterpretedStatus::Charge(ChargeStatus::SystemCancelled)
        );
        assert_eq!(
            m.from_token("CANCELLED_TOKEN", Some(ChargeStatus::UserCancelSubmitted)),
            InterpretedStatus::Charge(ChargeStatus::UserCancelled)
        );
    }

    #[test]
    fn qualified_mapping_without_matching_current_is_unknown() {
        let m = mapper();
        assert_eq!(
            m.from_token("CANCELLED_TOKEN", Some(ChargeStatus::AuthorisationSuccess)),
            InterpretedStatus::Unknown
        );
        assert_eq!(m.from_token("CANCELLED_TOKEN", None), InterpretedStatus::Unknown);
    }

    #[test]
    fn unmapped_token_is_unknown() {
        assert_eq!(
            StatusMapper::default().from_token("ANYTHING", None),
            InterpretedStatus::Unknown
        );
    }
}
