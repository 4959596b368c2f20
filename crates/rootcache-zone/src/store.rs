//! The immutable zone index and its query algorithm.

use hashbrown::{HashMap, HashSet};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use tracing::{debug, trace};

use crate::{canonical, canonical_name, top_level_label, RRset, Result, ZoneError};

/// A delegation point: the NS set of a name plus the glue of its targets.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegationEntry {
    ns: RRset,
    additional: Vec<Record>,
}

impl DelegationEntry {
    /// Returns the delegation's NS set.
    pub fn ns(&self) -> &RRset {
        &self.ns
    }

    /// Returns the A and AAAA records of the NS targets.
    pub fn additional(&self) -> &[Record] {
        &self.additional
    }
}

/// The sections produced by [`ZoneStore::query`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    /// Answer section.
    pub answer: Vec<Record>,
    /// Authority section.
    pub authority: Vec<Record>,
    /// Additional section.
    pub additional: Vec<Record>,
    /// Whether the response is authoritative (true only at the root).
    pub authoritative: bool,
}

impl QueryResponse {
    /// Returns true if every section is empty.
    pub fn is_empty(&self) -> bool {
        self.answer.is_empty() && self.authority.is_empty() && self.additional.is_empty()
    }

    fn referral(entry: &DelegationEntry) -> Self {
        Self {
            answer: Vec::new(),
            authority: entry.ns.records().to_vec(),
            additional: entry.additional.clone(),
            authoritative: false,
        }
    }
}

type TypeMap = HashMap<RecordType, RRset>;

/// An immutable, indexed view of one root zone snapshot.
#[derive(Debug)]
pub struct ZoneStore {
    index: HashMap<Name, TypeMap>,
    delegations: HashMap<Name, DelegationEntry>,
    signatures: HashMap<Name, Vec<Record>>,
    record_count: usize,
}

impl ZoneStore {
    /// Builds a store from a flat record list.
    ///
    /// Fails with [`ZoneError::EmptyInput`] when `records` is empty and with
    /// [`ZoneError::NoDelegations`] when no name owns an NS set.
    pub fn build(records: impl IntoIterator<Item = Record>) -> Result<Self> {
        let mut index: HashMap<Name, TypeMap> = HashMap::new();
        let mut signatures: HashMap<Name, Vec<Record>> = HashMap::new();
        let mut record_count = 0usize;

        for record in records {
            let owner = canonical(record.name());
            let rtype = record.record_type();
            let signature = (rtype == RecordType::RRSIG).then(|| record.clone());

            let set = index
                .entry(owner.clone())
                .or_default()
                .entry(rtype)
                .or_insert_with(|| RRset::new(&owner, rtype));
            if !set.add(record) {
                continue;
            }
            record_count += 1;

            if let Some(signature) = signature {
                signatures.entry(owner).or_default().push(signature);
            }
        }

        if record_count == 0 {
            return Err(ZoneError::EmptyInput);
        }

        let delegations: HashMap<Name, DelegationEntry> = index
            .iter()
            .filter_map(|(owner, types)| {
                let ns = types.get(&RecordType::NS)?;
                let entry = DelegationEntry {
                    ns: ns.clone(),
                    additional: collect_glue(&index, ns),
                };
                Some((owner.clone(), entry))
            })
            .collect();

        if delegations.is_empty() {
            return Err(ZoneError::NoDelegations);
        }

        debug!(
            records = record_count,
            names = index.len(),
            delegations = delegations.len(),
            signed_names = signatures.len(),
            "built zone store"
        );

        Ok(Self {
            index,
            delegations,
            signatures,
            record_count,
        })
    }

    /// Answers a query given as text.
    ///
    /// An unparsable name yields an empty, non-authoritative response.
    pub fn query(&self, name: &str, rtype: RecordType, dnssec_ok: bool) -> QueryResponse {
        match canonical_name(name) {
            Some(name) => self.query_name(&name, rtype, dnssec_ok),
            None => {
                trace!(name, "unparsable query name");
                QueryResponse::default()
            }
        }
    }

    /// Answers a query for `name` and `rtype`.
    ///
    /// The root is answered authoritatively from the index. Any other name
    /// gets the referral for its top-level label, or an empty response when
    /// that label is not delegated.
    ///
    /// `dnssec_ok` is accepted but signatures are never attached.
    pub fn query_name(&self, name: &Name, rtype: RecordType, dnssec_ok: bool) -> QueryResponse {
        let name = canonical(name);
        if dnssec_ok {
            trace!(%name, "DO bit set; RRSIGs are not attached");
        }

        if name.is_root() {
            return self.answer_root(rtype);
        }

        let tld = top_level_label(&name);
        match self.delegations.get(&tld) {
            Some(entry) => QueryResponse::referral(entry),
            None => QueryResponse::default(),
        }
    }

    fn answer_root(&self, rtype: RecordType) -> QueryResponse {
        let root = Name::root();
        let mut response = QueryResponse {
            authoritative: true,
            ..QueryResponse::default()
        };

        if let Some(set) = self.lookup(&root, rtype) {
            response.answer = set.records().to_vec();
            if rtype == RecordType::NS {
                if let Some(entry) = self.delegations.get(&root) {
                    response.additional = entry.additional.clone();
                }
            }
        } else if let Some(soa) = self.lookup(&root, RecordType::SOA) {
            response.authority = soa.records().to_vec();
        }

        response
    }

    /// Returns the set indexed under exactly `name` and `rtype`.
    pub fn lookup(&self, name: &Name, rtype: RecordType) -> Option<&RRset> {
        self.index.get(&canonical(name))?.get(&rtype)
    }

    /// Returns the delegation owned by exactly `name`.
    pub fn delegation(&self, name: &Name) -> Option<&DelegationEntry> {
        self.delegations.get(&canonical(name))
    }

    /// Returns the RRSIG records owned by `name`.
    pub fn signatures(&self, name: &Name) -> &[Record] {
        self.signatures
            .get(&canonical(name))
            .map_or(&[][..], Vec::as_slice)
    }

    /// Returns the number of distinct records in the store.
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Returns the number of delegation points, the root included.
    pub fn delegation_count(&self) -> usize {
        self.delegations.len()
    }

    /// Returns the owner names in the index.
    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.index.keys()
    }

    /// Returns every record set in the index.
    pub fn rrsets(&self) -> impl Iterator<Item = &RRset> {
        self.index.values().flat_map(HashMap::values)
    }

    /// Returns every record in the index.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.rrsets().flat_map(RRset::iter)
    }
}

fn ns_target(record: &Record) -> Option<&Name> {
    match record.data() {
        RData::NS(ns) => Some(&ns.0),
        _ => None,
    }
}

// Glue comes from the NS targets, in NS order, each target at most once.
fn collect_glue(index: &HashMap<Name, TypeMap>, ns: &RRset) -> Vec<Record> {
    let mut seen = HashSet::new();
    let mut glue = Vec::new();

    for target in ns.iter().filter_map(ns_target) {
        let target = canonical(target);
        let Some(types) = index.get(&target) else {
            continue;
        };
        if !seen.insert(target) {
            continue;
        }
        for rtype in [RecordType::A, RecordType::AAAA] {
            if let Some(set) = types.get(&rtype) {
                glue.extend(set.iter().cloned());
            }
        }
    }

    glue
}
