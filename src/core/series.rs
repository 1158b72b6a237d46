use serde::{Deserialize, Serialize};

/// SIFEN environment a document is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Test environment (sifen-test).
    Test,
    /// Production environment.
    Production,
}

/// Electronic document type (subset of the SIFEN `iTiDE` catalog).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    /// 1: Factura electrónica.
    FacturaElectronica,
    /// 4: Autofactura electrónica.
    AutofacturaElectronica,
    /// 5: Nota de crédito electrónica.
    NotaCreditoElectronica,
    /// 6: Nota de débito electrónica.
    NotaDebitoElectronica,
    /// 7: Nota de remisión electrónica.
    NotaRemisionElectronica,
}

impl DocumentType {
    /// Numeric `iTiDE` code.
    pub fn code(self) -> u8 {
        match self {
            Self::FacturaElectronica => 1,
            Self::AutofacturaElectronica => 4,
            Self::NotaCreditoElectronica => 5,
            Self::NotaDebitoElectronica => 6,
            Self::NotaRemisionElectronica => 7,
        }
    }
}

/// Emission type (`iTipEmi`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmissionType {
    /// 1: Normal (online) emission.
    Normal,
    /// 2: Contingency emission.
    Contingencia,
}

impl EmissionType {
    /// Numeric `iTipEmi` code.
    pub fn code(self) -> u8 {
        match self {
            Self::Normal => 1,
            Self::Contingencia => 2,
        }
    }
}

/// Identity of a numbering series: one counter row exists per key.
///
/// Immutable once attached to a document. The tuple (issuer RUC,
/// establishment, expedition point, document type) plus the environment
/// scopes one gapless numbering sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    /// Target environment.
    pub environment: Environment,
    /// Issuer tax identifier (RUC) without its check digit.
    pub ruc: String,
    /// Establishment code, three digits (e.g. "001").
    pub establishment: String,
    /// Expedition point code, three digits (e.g. "003").
    pub expedition_point: String,
    /// Electronic document type.
    pub document_type: DocumentType,
}

impl DocumentKey {
    /// Create a key for one numbering series.
    pub fn new(
        environment: Environment,
        ruc: impl Into<String>,
        establishment: impl Into<String>,
        expedition_point: impl Into<String>,
        document_type: DocumentType,
    ) -> Self {
        Self {
            environment,
            ruc: ruc.into(),
            establishment: establishment.into(),
            expedition_point: expedition_point.into(),
            document_type,
        }
    }
}

impl std::fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}/{}-{}-{}/t{}",
            self.environment,
            self.ruc,
            self.establishment,
            self.expedition_point,
            self.document_type.code()
        )
    }
}

/// Format an assigned number the way SIFEN expects it printed:
/// `establecimiento-punto-número` with a 7-digit zero-padded number.
pub fn format_document_number(key: &DocumentKey, number: u64) -> String {
    format!(
        "{}-{}-{:07}",
        key.establishment, key.expedition_point, number
    )
}
