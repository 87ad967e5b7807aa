use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// PDG Monte-Carlo particle numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticleId(pub i32);

impl ParticleId {
    pub fn abs(self) -> i32 {
        self.0.abs()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticleProperty {
    pub name: &'static str,
    pub id: ParticleId,
    /// Mass in MeV.
    pub mass: f64,
    /// Charge in units of e.
    pub charge: i32,
}

// name, pdg id, mass (MeV), charge
const STANDARD: &[(&str, i32, f64, i32)] = &[
    ("e-", 11, 0.510_998_95, -1),
    ("e+", -11, 0.510_998_95, 1),
    ("mu-", 13, 105.658_375_5, -1),
    ("mu+", -13, 105.658_375_5, 1),
    ("gamma", 22, 0.0, 0),
    ("pi0", 111, 134.976_8, 0),
    ("pi+", 211, 139.570_39, 1),
    ("pi-", -211, 139.570_39, -1),
    ("KS0", 310, 497.611, 0),
    ("K+", 321, 493.677, 1),
    ("K-", -321, 493.677, -1),
    ("D+", 411, 1869.66, 1),
    ("D-", -411, 1869.66, -1),
    ("D0", 421, 1864.84, 0),
    ("D~0", -421, 1864.84, 0),
    ("D_s+", 431, 1968.35, 1),
    ("D_s-", -431, 1968.35, -1),
    ("B0", 511, 5279.65, 0),
    ("B~0", -511, 5279.65, 0),
    ("B+", 521, 5279.34, 1),
    ("B-", -521, 5279.34, -1),
    ("p+", 2212, 938.272_088, 1),
    ("p~-", -2212, 938.272_088, -1),
    ("Lambda0", 3122, 1115.683, 0),
    ("Lambda~0", -3122, 1115.683, 0),
    ("Lambda_c+", 4122, 2286.46, 1),
    ("Lambda_c~-", -4122, 2286.46, -1),
    ("Xi_cc+", 4412, 3621.4, 1),
    ("Xi_cc~-", -4412, 3621.4, -1),
    ("Xi_cc++", 4422, 3621.4, 2),
    ("Xi_cc~--", -4422, 3621.4, -2),
];

/// Static particle property service.
#[derive(Debug, Clone)]
pub struct ParticleTable {
    by_name: BTreeMap<&'static str, ParticleProperty>,
    by_id: BTreeMap<ParticleId, &'static str>,
}

impl ParticleTable {
    pub fn standard() -> Self {
        let mut by_name = BTreeMap::new();
        let mut by_id = BTreeMap::new();
        for &(name, id, mass, charge) in STANDARD {
            by_name.insert(
                name,
                ParticleProperty {
                    name,
                    id: ParticleId(id),
                    mass,
                    charge,
                },
            );
            by_id.insert(ParticleId(id), name);
        }
        Self { by_name, by_id }
    }

    pub fn by_name(&self, name: &str) -> Option<&ParticleProperty> {
        self.by_name.get(name)
    }

    pub fn by_id(&self, id: ParticleId) -> Option<&ParticleProperty> {
        self.by_id.get(&id).and_then(|name| self.by_name.get(name))
    }

    /// Name of the charge-conjugate state. Self-conjugate particles map to
    /// themselves.
    pub fn antiparticle(&self, name: &str) -> Option<&'static str> {
        let prop = self.by_name(name)?;
        match self.by_id.get(&ParticleId(-prop.id.0)) {
            Some(anti) => Some(anti),
            None => Some(prop.name),
        }
    }
}

impl Default for ParticleTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conjugates() {
        let table = ParticleTable::standard();
        assert_eq!(table.antiparticle("D0"), Some("D~0"));
        assert_eq!(table.antiparticle("p~-"), Some("p+"));
        assert_eq!(table.antiparticle("gamma"), Some("gamma"));
        assert_eq!(table.antiparticle("X(3872)"), None);
    }

    #[test]
    fn lookup_by_id() {
        let table = ParticleTable::standard();
        let k = table.by_id(ParticleId(-321)).unwrap();
        assert_eq!(k.name, "K-");
        assert_eq!(k.charge, -1);
    }
}
