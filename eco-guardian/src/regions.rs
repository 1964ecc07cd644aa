//! Brazilian federative units and biomes.
//!
//! State identifiers key the forecast registry and the store, so every input
//! form ("PA", "Pará", "para", "ESTADO DO PARÁ" after prefix stripping) must
//! resolve to the same [`Uf`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lowercase `s` and strip Portuguese diacritics.
pub fn fold_accents(s: &str) -> String {
    s.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Error returned when a region name matches nothing in the closed table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: {value}")]
pub struct UnknownRegion {
    pub what: &'static str,
    pub value: String,
}

// ============================================================================
// Federative Units
// ============================================================================

/// One of the 27 Brazilian federative units (26 states plus the Federal District).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Uf {
    #[serde(rename = "AC")]
    Acre,
    #[serde(rename = "AL")]
    Alagoas,
    #[serde(rename = "AP")]
    Amapa,
    #[serde(rename = "AM")]
    Amazonas,
    #[serde(rename = "BA")]
    Bahia,
    #[serde(rename = "CE")]
    Ceara,
    #[serde(rename = "DF")]
    DistritoFederal,
    #[serde(rename = "ES")]
    EspiritoSanto,
    #[serde(rename = "GO")]
    Goias,
    #[serde(rename = "MA")]
    Maranhao,
    #[serde(rename = "MT")]
    MatoGrosso,
    #[serde(rename = "MS")]
    MatoGrossoDoSul,
    #[serde(rename = "MG")]
    MinasGerais,
    #[serde(rename = "PA")]
    Para,
    #[serde(rename = "PB")]
    Paraiba,
    #[serde(rename = "PR")]
    Parana,
    #[serde(rename = "PE")]
    Pernambuco,
    #[serde(rename = "PI")]
    Piaui,
    #[serde(rename = "RJ")]
    RioDeJaneiro,
    #[serde(rename = "RN")]
    RioGrandeDoNorte,
    #[serde(rename = "RS")]
    RioGrandeDoSul,
    #[serde(rename = "RO")]
    Rondonia,
    #[serde(rename = "RR")]
    Roraima,
    #[serde(rename = "SC")]
    SantaCatarina,
    #[serde(rename = "SP")]
    SaoPaulo,
    #[serde(rename = "SE")]
    Sergipe,
    #[serde(rename = "TO")]
    Tocantins,
}

const UF_TABLE: [(Uf, &str, &str); 27] = [
    (Uf::Acre, "AC", "Acre"),
    (Uf::Alagoas, "AL", "Alagoas"),
    (Uf::Amapa, "AP", "Amapá"),
    (Uf::Amazonas, "AM", "Amazonas"),
    (Uf::Bahia, "BA", "Bahia"),
    (Uf::Ceara, "CE", "Ceará"),
    (Uf::DistritoFederal, "DF", "Distrito Federal"),
    (Uf::EspiritoSanto, "ES", "Espírito Santo"),
    (Uf::Goias, "GO", "Goiás"),
    (Uf::Maranhao, "MA", "Maranhão"),
    (Uf::MatoGrosso, "MT", "Mato Grosso"),
    (Uf::MatoGrossoDoSul, "MS", "Mato Grosso do Sul"),
    (Uf::MinasGerais, "MG", "Minas Gerais"),
    (Uf::Para, "PA", "Pará"),
    (Uf::Paraiba, "PB", "Paraíba"),
    (Uf::Parana, "PR", "Paraná"),
    (Uf::Pernambuco, "PE", "Pernambuco"),
    (Uf::Piaui, "PI", "Piauí"),
    (Uf::RioDeJaneiro, "RJ", "Rio de Janeiro"),
    (Uf::RioGrandeDoNorte, "RN", "Rio Grande do Norte"),
    (Uf::RioGrandeDoSul, "RS", "Rio Grande do Sul"),
    (Uf::Rondonia, "RO", "Rondônia"),
    (Uf::Roraima, "RR", "Roraima"),
    (Uf::SantaCatarina, "SC", "Santa Catarina"),
    (Uf::SaoPaulo, "SP", "São Paulo"),
    (Uf::Sergipe, "SE", "Sergipe"),
    (Uf::Tocantins, "TO", "Tocantins"),
];

impl Uf {
    /// Every unit in table order.
    pub fn all() -> impl Iterator<Item = Uf> {
        UF_TABLE.iter().map(|(uf, _, _)| *uf)
    }

    // Table rows follow declaration order, so the discriminant is the row index.
    fn entry(self) -> &'static (Uf, &'static str, &'static str) {
        &UF_TABLE[self as usize]
    }

    /// Two-letter abbreviation ("PA").
    pub fn sigla(self) -> &'static str {
        self.entry().1
    }

    /// Full name with accents ("Pará").
    pub fn name(self) -> &'static str {
        self.entry().2
    }

    /// Contracted preposition used before the name ("do Pará", "da Bahia").
    pub fn preposition(self) -> &'static str {
        match self {
            Uf::Bahia | Uf::Paraiba => "da",
            Uf::Alagoas
            | Uf::Goias
            | Uf::MatoGrosso
            | Uf::MatoGrossoDoSul
            | Uf::MinasGerais
            | Uf::Pernambuco
            | Uf::Rondonia
            | Uf::Roraima
            | Uf::SantaCatarina
            | Uf::SaoPaulo
            | Uf::Sergipe => "de",
            _ => "do",
        }
    }

    /// Name of the unit's government ("Governo do Estado do Pará").
    pub fn government_name(self) -> String {
        match self {
            Uf::DistritoFederal => "Governo do Distrito Federal".to_string(),
            uf => format!("Governo do Estado {} {}", uf.preposition(), uf.name()),
        }
    }

    /// Names ordered longest first, for scanning free text without letting
    /// "Mato Grosso" shadow "Mato Grosso do Sul".
    pub fn names_longest_first() -> Vec<(Uf, &'static str)> {
        let mut names: Vec<(Uf, &'static str)> =
            UF_TABLE.iter().map(|(uf, _, name)| (*uf, *name)).collect();
        names.sort_by_key(|(_, name)| std::cmp::Reverse(name.len()));
        names
    }
}

impl fmt::Display for Uf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sigla())
    }
}

impl FromStr for Uf {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() == 2 {
            if let Some((uf, _, _)) = UF_TABLE
                .iter()
                .find(|(_, sigla, _)| sigla.eq_ignore_ascii_case(trimmed))
            {
                return Ok(*uf);
            }
        }

        let folded = fold_accents(trimmed);
        UF_TABLE
            .iter()
            .find(|(_, _, name)| fold_accents(name) == folded)
            .map(|(uf, _, _)| *uf)
            .ok_or_else(|| UnknownRegion {
                what: "state",
                value: s.to_string(),
            })
    }
}

// ============================================================================
// Biomes
// ============================================================================

/// The six Brazilian biomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Biome {
    Amazonia,
    Caatinga,
    Cerrado,
    Pantanal,
    MataAtlantica,
    Pampa,
}

impl Biome {
    pub const ALL: [Biome; 6] = [
        Biome::Amazonia,
        Biome::Caatinga,
        Biome::Cerrado,
        Biome::Pantanal,
        Biome::MataAtlantica,
        Biome::Pampa,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Biome::Amazonia => "Amazônia",
            Biome::Caatinga => "Caatinga",
            Biome::Cerrado => "Cerrado",
            Biome::Pantanal => "Pantanal",
            Biome::MataAtlantica => "Mata Atlântica",
            Biome::Pampa => "Pampa",
        }
    }
}

impl fmt::Display for Biome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Biome {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded = fold_accents(s.trim()).replace(['_', '-'], " ");
        Biome::ALL
            .into_iter()
            .find(|b| fold_accents(b.name()) == folded)
            .ok_or_else(|| UnknownRegion {
                what: "biome",
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twenty_seven_units() {
        assert_eq!(Uf::all().count(), 27);
        let mut siglas: Vec<_> = Uf::all().map(Uf::sigla).collect();
        siglas.sort_unstable();
        siglas.dedup();
        assert_eq!(siglas.len(), 27);
        for (idx, (uf, _, _)) in UF_TABLE.iter().enumerate() {
            assert_eq!(*uf as usize, idx);
        }
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!("PA".parse::<Uf>().unwrap(), Uf::Para);
        assert_eq!("pa".parse::<Uf>().unwrap(), Uf::Para);
        assert_eq!("Pará".parse::<Uf>().unwrap(), Uf::Para);
        assert_eq!("PARA".parse::<Uf>().unwrap(), Uf::Para);
        assert_eq!("sao paulo".parse::<Uf>().unwrap(), Uf::SaoPaulo);
        assert_eq!(" Mato Grosso do Sul ".parse::<Uf>().unwrap(), Uf::MatoGrossoDoSul);
        assert!("Atlântida".parse::<Uf>().is_err());
    }

    #[test]
    fn test_serde_uses_sigla() {
        assert_eq!(serde_json::to_string(&Uf::RioGrandeDoSul).unwrap(), "\"RS\"");
        let uf: Uf = serde_json::from_str("\"TO\"").unwrap();
        assert_eq!(uf, Uf::Tocantins);
        assert_eq!(Uf::MinasGerais.to_string(), "MG");
    }

    #[test]
    fn test_government_name() {
        assert_eq!(Uf::Para.government_name(), "Governo do Estado do Pará");
        assert_eq!(Uf::Bahia.government_name(), "Governo do Estado da Bahia");
        assert_eq!(Uf::SaoPaulo.government_name(), "Governo do Estado de São Paulo");
        assert_eq!(Uf::DistritoFederal.government_name(), "Governo do Distrito Federal");
    }

    #[test]
    fn test_longest_names_first() {
        let names = Uf::names_longest_first();
        let sul = names.iter().position(|(uf, _)| *uf == Uf::MatoGrossoDoSul).unwrap();
        let mt = names.iter().position(|(uf, _)| *uf == Uf::MatoGrosso).unwrap();
        assert!(sul < mt);
    }

    #[test]
    fn test_biome_parse() {
        assert_eq!("Amazônia".parse::<Biome>().unwrap(), Biome::Amazonia);
        assert_eq!("mata_atlantica".parse::<Biome>().unwrap(), Biome::MataAtlantica);
        assert_eq!("PAMPA".parse::<Biome>().unwrap(), Biome::Pampa);
        assert!("Tundra".parse::<Biome>().is_err());
    }
}
