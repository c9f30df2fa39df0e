use crate::types::{BuildOrder, ChargeDeclaration, SpeciesChoice};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

// Species and ship catalog. Ids and names only: ship powers belong to the rules engine, the
// protocol just needs to know which ids a payload may mention and how to label fleets.

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesDefinition {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShipDefinition {
    pub id: String,
    pub name: String,
    pub species: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("unknown species {0}")]
    UnknownSpecies(String),
    #[error("unknown ship definition {0}")]
    UnknownShip(String),
    #[error("ship {ship} does not belong to species {species}")]
    WrongSpecies { ship: String, species: String },
    #[error("build order for {0} has a zero count")]
    ZeroCount(String),
    #[error("ship {0} declared more than once")]
    DuplicateShip(String),
}

fn species(id: &str, name: &str) -> SpeciesDefinition {
    SpeciesDefinition {
        id: id.to_string(),
        name: name.to_string(),
    }
}

fn ship(id: &str, name: &str, species: &str) -> ShipDefinition {
    ShipDefinition {
        id: id.to_string(),
        name: name.to_string(),
        species: species.to_string(),
    }
}

pub fn build_species() -> Vec<SpeciesDefinition> {
    vec![
        species("terran", "Terran League"),
        species("ancient", "The Ancients"),
        species("xenite", "Xenite Swarm"),
    ]
}

pub fn build_catalog() -> Vec<ShipDefinition> {
    vec![
        ship("te-defender", "Defender", "terran"),
        ship("te-fighter", "Fighter", "terran"),
        ship("te-carrier", "Carrier", "terran"),
        ship("an-mothership", "Mothership", "ancient"),
        ship("an-shard", "Shard", "ancient"),
        ship("an-spiral", "Spiral", "ancient"),
        ship("xe-larva", "Larva", "xenite"),
        ship("xe-stinger", "Stinger", "xenite"),
        ship("xe-hive", "Hive", "xenite"),
    ]
}

pub fn find_species(id: &str) -> Option<&'static SpeciesDefinition> {
    static SPECIES: OnceLock<Vec<SpeciesDefinition>> = OnceLock::new();
    let species = SPECIES.get_or_init(build_species);
    species.iter().find(|s| s.id == id)
}

fn catalog() -> &'static [ShipDefinition] {
    static CATALOG: OnceLock<Vec<ShipDefinition>> = OnceLock::new();
    CATALOG.get_or_init(build_catalog)
}

pub fn find_ship(id: &str) -> Option<&'static ShipDefinition> {
    catalog().iter().find(|d| d.id == id)
}

pub fn ships_of(species: &str) -> Vec<&'static ShipDefinition> {
    catalog().iter().filter(|d| d.species == species).collect()
}

pub fn check_species_choice(choice: &SpeciesChoice) -> Result<(), PayloadError> {
    find_species(&choice.species)
        .map(|_| ())
        .ok_or_else(|| PayloadError::UnknownSpecies(choice.species.clone()))
}

/// Every ordered ship must exist, belong to `species` (when known) and appear once with a
/// positive count.
pub fn check_build_order(order: &BuildOrder, species: Option<&str>) -> Result<(), PayloadError> {
    let mut seen: Vec<&str> = Vec::new();
    for entry in order.ships.iter() {
        let def = find_ship(&entry.ship_def_id)
            .ok_or_else(|| PayloadError::UnknownShip(entry.ship_def_id.clone()))?;
        if let Some(species) = species {
            if def.species != species {
                return Err(PayloadError::WrongSpecies {
                    ship: def.id.clone(),
                    species: species.to_string(),
                });
            }
        }
        if entry.count == 0 {
            return Err(PayloadError::ZeroCount(entry.ship_def_id.clone()));
        }
        if seen.contains(&entry.ship_def_id.as_str()) {
            return Err(PayloadError::DuplicateShip(entry.ship_def_id.clone()));
        }
        seen.push(&entry.ship_def_id);
    }
    Ok(())
}

pub fn check_charge_declaration(declaration: &ChargeDeclaration) -> Result<(), PayloadError> {
    let mut seen: Vec<&str> = Vec::new();
    for id in declaration.ship_ids.iter() {
        if seen.contains(&id.as_str()) {
            return Err(PayloadError::DuplicateShip(id.clone()));
        }
        seen.push(id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ShipOrder;

    fn order(entries: &[(&str, u32)]) -> BuildOrder {
        BuildOrder {
            ships: entries
                .iter()
                .map(|(id, count)| ShipOrder {
                    ship_def_id: id.to_string(),
                    count: *count,
                })
                .collect(),
        }
    }

    #[test]
    fn every_ship_belongs_to_a_known_species() {
        for def in build_catalog() {
            assert!(find_species(&def.species).is_some(), "{}", def.id);
        }
        assert_eq!(ships_of("terran").len(), 3);
        assert!(ships_of("dolphins").is_empty());
    }

    #[test]
    fn build_orders_are_checked_against_species() {
        assert!(check_build_order(&order(&[("te-fighter", 2)]), Some("terran")).is_ok());
        assert_eq!(
            check_build_order(&order(&[("xe-larva", 1)]), Some("terran")),
            Err(PayloadError::WrongSpecies {
                ship: "xe-larva".into(),
                species: "terran".into()
            })
        );
        assert!(matches!(
            check_build_order(&order(&[("nope", 1)]), None),
            Err(PayloadError::UnknownShip(_))
        ));
        assert!(matches!(
            check_build_order(&order(&[("te-fighter", 0)]), None),
            Err(PayloadError::ZeroCount(_))
        ));
        assert!(matches!(
            check_build_order(&order(&[("te-fighter", 1), ("te-fighter", 1)]), None),
            Err(PayloadError::DuplicateShip(_))
        ));
    }
}
