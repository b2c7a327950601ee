//! Computes the structural changes between a persisted ontology snapshot and a newly
//! loaded one. Records name entities by URI so they stay meaningful against both sides.

use super::{ClassIdx, Ontologies, PropertyIdx};
use crate::value::PropertyType;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    NewClass { class: String },
    /// Emitted for multi-valued properties and for properties added to existing classes.
    NewProperty { property: String },
    NewSuperClass { class: String, super_class: String },
    NewSuperProperty { property: String, super_property: String },
    NewDomainIndex { class: String, property: String },
    NewIndex { property: String },
    NewSecondaryIndex { property: String, secondary: String },
    NewFulltext { property: String },
    NewInverseFunctional { property: String },
    DeleteClass { class: String },
    DeleteProperty { property: String },
    DeleteSuperClass { class: String, super_class: String },
    DeleteSuperProperty { property: String, super_property: String },
    DeleteDomainIndex { class: String, property: String },
    DeleteIndex { property: String },
    DeleteSecondaryIndex { property: String, secondary: String },
    DeleteFulltext { property: String },
    DeleteInverseFunctional { property: String },
    RangeChanged { property: String, from: PropertyType, to: PropertyType },
    DomainChanged { property: String, from: String, to: String },
    CardinalityChanged { property: String, multiple_values: bool },
}

impl Change {
    /// Whether applying the change alters tables or columns the full-text view reads.
    pub fn affects_fulltext(&self) -> bool {
        !matches!(
            self,
            Change::NewIndex { .. }
                | Change::DeleteIndex { .. }
                | Change::NewSecondaryIndex { .. }
                | Change::DeleteSecondaryIndex { .. }
                | Change::NewInverseFunctional { .. }
                | Change::DeleteInverseFunctional { .. }
        )
    }
}

/// Diffs `old` (absent for a fresh database) against `new`, carrying the resource ids of
/// entities present in both snapshots over to `new`.
pub fn diff(old: Option<&Ontologies>, new: &mut Ontologies) -> Vec<Change> {
    let mut changes = Vec::new();
    new_entities(old, new, &mut changes);
    if let Some(old) = old {
        changed_entities(old, new, &mut changes);
        deleted_entities(old, new, &mut changes);
        new.reindex();
    }
    changes
}

fn class_uri(ont: &Ontologies, idx: ClassIdx) -> String {
    ont.class(idx).uri().to_string()
}

fn property_uri(ont: &Ontologies, idx: PropertyIdx) -> String {
    ont.property(idx).uri().to_string()
}

fn property_flags(ont: &Ontologies, idx: PropertyIdx, changes: &mut Vec<Change>) {
    let p = ont.property(idx);
    let property = p.uri().to_string();
    if p.indexed {
        changes.push(Change::NewIndex { property: property.clone() });
    }
    if let Some(secondary) = p.secondary_index {
        changes.push(Change::NewSecondaryIndex {
            property: property.clone(),
            secondary: property_uri(ont, secondary),
        });
    }
    if p.fulltext_indexed {
        changes.push(Change::NewFulltext { property: property.clone() });
    }
    if p.inverse_functional {
        changes.push(Change::NewInverseFunctional { property });
    }
}

fn deleted_property_flags(ont: &Ontologies, idx: PropertyIdx, changes: &mut Vec<Change>) {
    let p = ont.property(idx);
    let property = p.uri().to_string();
    if p.indexed {
        changes.push(Change::DeleteIndex { property: property.clone() });
    }
    if let Some(secondary) = p.secondary_index {
        changes.push(Change::DeleteSecondaryIndex {
            property: property.clone(),
            secondary: property_uri(ont, secondary),
        });
    }
    if p.fulltext_indexed {
        changes.push(Change::DeleteFulltext { property: property.clone() });
    }
    if p.inverse_functional {
        changes.push(Change::DeleteInverseFunctional { property });
    }
}

fn new_entities(old: Option<&Ontologies>, new: &Ontologies, changes: &mut Vec<Change>) {
    let class_existed = |uri: &str| old.map_or(false, |old| old.class_by_uri(uri).is_some());
    let property_existed = |uri: &str| old.map_or(false, |old| old.property_by_uri(uri).is_some());

    for (_, class) in new.classes() {
        if !class_existed(class.uri()) {
            changes.push(Change::NewClass { class: class.uri().to_string() });
        }
    }
    let mut flagged = Vec::new();
    for (idx, property) in new.properties() {
        if property_existed(property.uri()) {
            continue;
        }
        let domain = new.class(property.domain);
        if property.multiple_values || class_existed(domain.uri()) {
            changes.push(Change::NewProperty { property: property.uri().to_string() });
        }
        flagged.push(idx);
    }
    for idx in flagged {
        property_flags(new, idx, changes);
    }
}

fn changed_entities(old: &Ontologies, new: &mut Ontologies, changes: &mut Vec<Change>) {
    let classes: Vec<ClassIdx> = new.classes().map(|(idx, _)| idx).collect();
    for idx in classes {
        let uri = class_uri(new, idx);
        let Some(old_idx) = old.class_by_uri(&uri) else {
            continue;
        };
        new.class_mut(idx).id = old.class(old_idx).id;

        let old_supers: BTreeSet<String> = old
            .class(old_idx)
            .super_classes()
            .iter()
            .map(|c| class_uri(old, *c))
            .collect();
        let new_supers: BTreeSet<String> = new
            .class(idx)
            .super_classes()
            .iter()
            .map(|c| class_uri(new, *c))
            .collect();
        for super_class in new_supers.difference(&old_supers) {
            changes.push(Change::NewSuperClass {
                class: uri.clone(),
                super_class: super_class.clone(),
            });
        }
        for super_class in old_supers.difference(&new_supers) {
            changes.push(Change::DeleteSuperClass {
                class: uri.clone(),
                super_class: super_class.clone(),
            });
        }

        let old_indexes: BTreeSet<String> = old
            .class(old_idx)
            .domain_indexes()
            .iter()
            .map(|p| property_uri(old, *p))
            .collect();
        for property in new.class(idx).domain_indexes() {
            let property = property_uri(new, *property);
            if !old_indexes.contains(&property) {
                changes.push(Change::NewDomainIndex {
                    class: uri.clone(),
                    property,
                });
            }
        }
    }

    let properties: Vec<PropertyIdx> = new.properties().map(|(idx, _)| idx).collect();
    for idx in properties {
        let uri = property_uri(new, idx);
        let Some(old_idx) = old.property_by_uri(&uri) else {
            continue;
        };
        new.property_mut(idx).id = old.property(old_idx).id;
        let (o, n) = (old.property(old_idx), new.property(idx));

        let (old_domain, new_domain) = (class_uri(old, o.domain), class_uri(new, n.domain));
        if old_domain != new_domain {
            changes.push(Change::DomainChanged {
                property: uri.clone(),
                from: old_domain,
                to: new_domain,
            });
        }
        if class_uri(old, o.range) != class_uri(new, n.range) {
            changes.push(Change::RangeChanged {
                property: uri.clone(),
                from: o.data_type,
                to: n.data_type,
            });
        }

        if o.multiple_values != n.multiple_values {
            changes.push(Change::CardinalityChanged {
                property: uri.clone(),
                multiple_values: n.multiple_values,
            });
            deleted_property_flags(old, old_idx, changes);
            property_flags(new, idx, changes);
        } else {
            if o.indexed != n.indexed {
                changes.push(if n.indexed {
                    Change::NewIndex { property: uri.clone() }
                } else {
                    Change::DeleteIndex { property: uri.clone() }
                });
            }
            let old_secondary = o.secondary_index.map(|p| property_uri(old, p));
            let new_secondary = n.secondary_index.map(|p| property_uri(new, p));
            if old_secondary != new_secondary {
                if let Some(secondary) = old_secondary {
                    changes.push(Change::DeleteSecondaryIndex {
                        property: uri.clone(),
                        secondary,
                    });
                }
                if let Some(secondary) = new_secondary {
                    changes.push(Change::NewSecondaryIndex {
                        property: uri.clone(),
                        secondary,
                    });
                }
            }
            if o.fulltext_indexed != n.fulltext_indexed {
                changes.push(if n.fulltext_indexed {
                    Change::NewFulltext { property: uri.clone() }
                } else {
                    Change::DeleteFulltext { property: uri.clone() }
                });
            }
            if o.inverse_functional != n.inverse_functional {
                changes.push(if n.inverse_functional {
                    Change::NewInverseFunctional { property: uri.clone() }
                } else {
                    Change::DeleteInverseFunctional { property: uri.clone() }
                });
            }
        }

        let old_supers: BTreeSet<String> =
            o.super_properties.iter().map(|p| property_uri(old, *p)).collect();
        let new_supers: BTreeSet<String> =
            n.super_properties.iter().map(|p| property_uri(new, *p)).collect();
        for super_property in new_supers.difference(&old_supers) {
            changes.push(Change::NewSuperProperty {
                property: uri.clone(),
                super_property: super_property.clone(),
            });
        }
        for super_property in old_supers.difference(&new_supers) {
            changes.push(Change::DeleteSuperProperty {
                property: uri.clone(),
                super_property: super_property.clone(),
            });
        }
    }
}

fn deleted_entities(old: &Ontologies, new: &Ontologies, changes: &mut Vec<Change>) {
    for (_, class) in old.classes() {
        let kept = new.class_by_uri(class.uri());
        for property in class.domain_indexes() {
            let property = property_uri(old, *property);
            let still_indexed = kept.map_or(false, |kept| {
                new.class(kept)
                    .domain_indexes()
                    .iter()
                    .any(|p| new.property(*p).uri() == property)
            });
            if !still_indexed {
                changes.push(Change::DeleteDomainIndex {
                    class: class.uri().to_string(),
                    property,
                });
            }
        }
        if kept.is_some() {
            continue;
        }
        changes.push(Change::DeleteClass { class: class.uri().to_string() });
        for super_class in class.super_classes() {
            changes.push(Change::DeleteSuperClass {
                class: class.uri().to_string(),
                super_class: class_uri(old, *super_class),
            });
        }
    }

    for (idx, property) in old.properties() {
        if new.property_by_uri(property.uri()).is_some() {
            continue;
        }
        changes.push(Change::DeleteProperty { property: property.uri().to_string() });
        deleted_property_flags(old, idx, changes);
        for super_property in property.super_properties() {
            changes.push(Change::DeleteSuperProperty {
                property: property.uri().to_string(),
                super_property: property_uri(old, *super_property),
            });
        }
    }
}
