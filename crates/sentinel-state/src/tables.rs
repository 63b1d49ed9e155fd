//! redb table definitions for the Sentinel state store.
//!
//! Values are JSON-serialized domain types. Reports and repair actions use
//! `u64` keys drawn from counters in `META`, so an id is never handed out
//! twice even after retention deletes the newest rows. Detail rows use the
//! composite key `{len:04}:{target}/{report_id:020}/{index:04}`; the length
//! prefix keeps a target's prefix scan from matching `{target}/...` names.

use redb::TableDefinition;

/// Reports keyed by report id.
pub const REPORTS: TableDefinition<u64, &[u8]> = TableDefinition::new("reports");

/// Per-target observation rows keyed by `detail_key`.
pub const DETAILS: TableDefinition<&str, &[u8]> = TableDefinition::new("details");

/// Repair actions keyed by repair id.
pub const REPAIRS: TableDefinition<u64, &[u8]> = TableDefinition::new("repairs");

/// Live policies keyed by target name.
pub const POLICIES: TableDefinition<&str, &[u8]> = TableDefinition::new("policies");

/// Id counters, holding the next id to hand out.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub const NEXT_REPORT_ID: &str = "next_report_id";
pub const NEXT_REPAIR_ID: &str = "next_repair_id";

/// Build the detail-row key for a target observation.
pub fn detail_key(target: &str, report_id: u64, index: usize) -> String {
    format!("{}{report_id:020}/{index:04}", detail_prefix(target))
}

/// Key prefix covering every detail row of a target, and no other target's.
pub fn detail_prefix(target: &str) -> String {
    format!("{:04}:{target}/", target.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_does_not_cover_nested_names() {
        let key = detail_key("api/v2", 7, 0);
        assert!(!key.starts_with(&detail_prefix("api")));
        assert!(key.starts_with(&detail_prefix("api/v2")));
        assert_eq!(key, "0006:api/v2/00000000000000000007/0000");
    }
}
