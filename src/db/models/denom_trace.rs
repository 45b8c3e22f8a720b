use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Resolved IBC denom trace (PostgreSQL).
///
/// Maps the on-chain identifier `ibc/<hex>` to its transfer path and base
/// denom. Traces are immutable once resolved and are never pruned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenomTrace {
    /// The `ibc/<hex>` form used on chain.
    pub ibc_denom: String,
    /// Port/channel hops, e.g. `transfer/channel-0`.
    pub path: String,
    /// The denom on the origin chain, e.g. `uatom`.
    pub base_denom: String,
}

impl DenomTrace {
    pub fn new(
        ibc_denom: impl Into<String>,
        path: impl Into<String>,
        base_denom: impl Into<String>,
    ) -> Self {
        Self {
            ibc_denom: ibc_denom.into(),
            path: path.into(),
            base_denom: base_denom.into(),
        }
    }

    /// Builds a trace from its path and base denom, deriving the on-chain
    /// identifier: `ibc/` followed by the uppercase hex SHA-256 of
    /// `"<path>/<base_denom>"`.
    pub fn from_path(path: impl Into<String>, base_denom: impl Into<String>) -> Self {
        let path = path.into();
        let base_denom = base_denom.into();

        let full = if path.is_empty() {
            base_denom.clone()
        } else {
            format!("{path}/{base_denom}")
        };
        let digest = Sha256::digest(full.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02X}")).collect();

        Self {
            ibc_denom: format!("ibc/{hex}"),
            path,
            base_denom,
        }
    }
}
