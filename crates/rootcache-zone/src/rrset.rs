//! Resource record sets.

use hickory_proto::rr::{Name, Record, RecordType};

use crate::canonical;

/// Records sharing one (owner name, type) key.
///
/// Equality is set equality: two sets compare equal when they hold the same
/// records, regardless of insertion order.
#[derive(Debug, Clone)]
pub struct RRset {
    name: Name,
    rtype: RecordType,
    records: Vec<Record>,
}

impl RRset {
    /// Creates an empty set for the given key. The name is canonicalized.
    pub fn new(name: &Name, rtype: RecordType) -> Self {
        Self {
            name: canonical(name),
            rtype,
            records: Vec::new(),
        }
    }

    /// Returns the canonical owner name.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Returns the record type.
    pub fn rtype(&self) -> RecordType {
        self.rtype
    }

    /// Returns the records in insertion order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the set holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns an iterator over the records.
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Returns true if an identical record is already in the set.
    pub fn contains(&self, record: &Record) -> bool {
        self.records.iter().any(|r| r == record)
    }

    /// Adds a record to the set.
    ///
    /// Returns false when the record belongs to a different key or is an
    /// exact duplicate of a record already present.
    pub fn add(&mut self, record: Record) -> bool {
        if record.record_type() != self.rtype || canonical(record.name()) != self.name {
            return false;
        }
        if self.contains(&record) {
            return false;
        }
        self.records.push(record);
        true
    }
}

impl PartialEq for RRset {
    fn eq(&self, other: &Self) -> bool {
        self.rtype == other.rtype
            && self.name == other.name
            && self.records.len() == other.records.len()
            && self.records.iter().all(|r| other.contains(r))
            && other.records.iter().all(|r| self.contains(r))
    }
}

impl Eq for RRset {}

impl<'a> IntoIterator for &'a RRset {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::rdata::{A, NS};
    use hickory_proto::rr::RData;
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    fn single(record: Record) -> RRset {
        let mut set = RRset::new(record.name(), record.record_type());
        assert!(set.add(record));
        set
    }

    fn ns(owner: &str, target: &str) -> Record {
        Record::from_rdata(
            Name::from_str(owner).unwrap(),
            172_800,
            RData::NS(NS(Name::from_str(target).unwrap())),
        )
    }

    #[test]
    fn test_add_rejects_foreign_records() {
        let mut set = single(ns("com.", "a.gtld-servers.net."));
        assert!(set.add(ns("com.", "b.gtld-servers.net.")));
        assert!(!set.add(ns("net.", "a.gtld-servers.net.")));

        let a = Record::from_rdata(
            Name::from_str("com.").unwrap(),
            300,
            RData::A(A(Ipv4Addr::new(192, 0, 2, 1))),
        );
        assert!(!set.add(a));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_add_skips_duplicates() {
        let mut set = single(ns("com.", "a.gtld-servers.net."));
        assert!(!set.add(ns("com.", "a.gtld-servers.net.")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_owner_case_is_ignored() {
        let mut set = RRset::new(&Name::from_str("COM.").unwrap(), RecordType::NS);
        assert!(set.add(ns("Com.", "a.gtld-servers.net.")));
        assert_eq!(set.name().to_string(), "com.");
    }

    #[test]
    fn test_set_equality_ignores_order() {
        let mut left = single(ns("com.", "a.gtld-servers.net."));
        left.add(ns("com.", "b.gtld-servers.net."));

        let mut right = single(ns("com.", "b.gtld-servers.net."));
        right.add(ns("com.", "a.gtld-servers.net."));

        assert_eq!(left, right);

        right.add(ns("com.", "c.gtld-servers.net."));
        assert_ne!(left, right);
    }
}
