//! CDC (Código de Control) check digit engine.
//!
//! A CDC is a 44-digit document identifier: a 43-digit base followed by a
//! mod-11 check digit computed with cyclic weights 2..=9 processed
//! right-to-left. The CDC binds a document's identity; once bound, it is
//! never regenerated in place (a new CDC means a new document).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::CdcError;
use super::series::{DocumentKey, EmissionType};

/// Length of the CDC base, without the check digit.
pub const CDC_BASE_LEN: usize = 43;

/// Length of a complete CDC.
pub const CDC_LEN: usize = 44;

fn ensure_digits(s: &str, expected: usize) -> Result<(), CdcError> {
    if s.len() != expected {
        return Err(CdcError::InvalidLength {
            expected,
            got: s.len(),
        });
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CdcError::NonNumeric);
    }
    Ok(())
}

/// Compute the mod-11 check digit for a 43-digit CDC base.
///
/// Digits are processed right-to-left with a cyclic weight starting at 2 and
/// incrementing up to 9 before resetting to 2. The raw value `11 - (sum % 11)`
/// maps 11 → 0 and 10 → 1.
///
/// # Errors
///
/// [`CdcError::InvalidLength`] unless the input is exactly 43 characters,
/// [`CdcError::NonNumeric`] if any character is not an ASCII digit.
pub fn compute_check_digit(base: &str) -> Result<u8, CdcError> {
    ensure_digits(base, CDC_BASE_LEN)?;

    let mut sum: u32 = 0;
    let mut weight: u32 = 2;
    for b in base.bytes().rev() {
        sum += u32::from(b - b'0') * weight;
        weight = if weight == 9 { 2 } else { weight + 1 };
    }

    let dv = match 11 - (sum % 11) {
        11 => 0,
        10 => 1,
        v => v,
    };
    Ok(dv as u8)
}

/// Check whether a 44-digit control code carries the correct check digit.
///
/// This is a predicate, not a fault: wrong length, non-numeric input, or a
/// mismatched digit all return `false`.
pub fn validate_control_code(code: &str) -> bool {
    if ensure_digits(code, CDC_LEN).is_err() {
        return false;
    }
    let (base, dv) = code.split_at(CDC_BASE_LEN);
    match compute_check_digit(base) {
        Ok(expected) => dv.as_bytes()[0] - b'0' == expected,
        Err(_) => false,
    }
}

/// Recompute and replace the trailing check digit of a 44-digit code.
///
/// Pure function, the input is untouched. The returned code always satisfies
/// [`validate_control_code`].
pub fn repair_control_code(code: &str) -> Result<String, CdcError> {
    ensure_digits(code, CDC_LEN)?;
    let base = &code[..CDC_BASE_LEN];
    let dv = compute_check_digit(base)?;
    Ok(format!("{base}{dv}"))
}

/// A validated 44-digit CDC.
///
/// Constructing a `Cdc` proves the check digit is consistent with the base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cdc(String);

impl Cdc {
    /// Parse and validate a complete 44-digit control code.
    pub fn parse(code: &str) -> Result<Self, CdcError> {
        ensure_digits(code, CDC_LEN)?;
        let dv = compute_check_digit(&code[..CDC_BASE_LEN])?;
        let got = code.as_bytes()[CDC_BASE_LEN] - b'0';
        if got != dv {
            return Err(CdcError::CheckDigitMismatch { expected: dv, got });
        }
        Ok(Self(code.to_owned()))
    }

    /// Build from a 43-digit base, appending the computed check digit.
    pub fn from_base(base: &str) -> Result<Self, CdcError> {
        let dv = compute_check_digit(base)?;
        Ok(Self(format!("{base}{dv}")))
    }

    /// The full 44-digit code.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 43-digit base without the check digit.
    pub fn base(&self) -> &str {
        &self.0[..CDC_BASE_LEN]
    }

    /// The trailing check digit.
    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[CDC_BASE_LEN] - b'0'
    }
}

impl std::fmt::Display for Cdc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compose a CDC base from the document identity fields.
///
/// Field layout (43 digits): document type (2), issuer RUC (8), RUC check
/// digit (1), establishment (3), expedition point (3), document number (7),
/// taxpayer type (1), emission date `AAAAMMDD` (8), emission type (1),
/// security code (9).
#[derive(Debug, Clone)]
pub struct CdcBuilder {
    key: DocumentKey,
    ruc_check_digit: u8,
    number: u64,
    taxpayer_type: u8,
    emission_date: NaiveDate,
    emission_type: EmissionType,
    security_code: u32,
}

impl CdcBuilder {
    /// Start a builder for the given series and assigned document number.
    pub fn new(key: DocumentKey, number: u64, emission_date: NaiveDate) -> Self {
        Self {
            key,
            ruc_check_digit: 0,
            number,
            taxpayer_type: 1,
            emission_date,
            emission_type: EmissionType::Normal,
            security_code: 0,
        }
    }

    /// Issuer RUC check digit (default 0).
    pub fn ruc_check_digit(mut self, dv: u8) -> Self {
        self.ruc_check_digit = dv;
        self
    }

    /// Taxpayer type, 1 = persona jurídica, 2 = persona física (default 1).
    pub fn taxpayer_type(mut self, t: u8) -> Self {
        self.taxpayer_type = t;
        self
    }

    /// Emission type (default [`EmissionType::Normal`]).
    pub fn emission_type(mut self, e: EmissionType) -> Self {
        self.emission_type = e;
        self
    }

    /// Authority-issued random security code (9 digits, zero-padded).
    pub fn security_code(mut self, code: u32) -> Self {
        self.security_code = code;
        self
    }

    /// Assemble the base and append the computed check digit.
    pub fn build(self) -> Result<Cdc, CdcError> {
        let base = format!(
            "{:02}{:0>8}{}{:0>3}{:0>3}{:07}{}{}{}{:09}",
            self.key.document_type.code(),
            self.key.ruc,
            self.ruc_check_digit % 10,
            self.key.establishment,
            self.key.expedition_point,
            self.number,
            self.taxpayer_type % 10,
            self.emission_date.format("%Y%m%d"),
            self.emission_type.code(),
            self.security_code % 1_000_000_000,
        );
        Cdc::from_base(&base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::series::{DocumentType, Environment};

    #[test]
    fn check_digit_reference_vector() {
        // Independently computed with the same mod-11 cyclic-weight rule.
        let base = "1234567890123456789012345678901234567890123";
        assert_eq!(compute_check_digit(base).unwrap(), 5);
    }

    #[test]
    fn check_digit_all_zeros_maps_eleven_to_zero() {
        let base = "0".repeat(43);
        assert_eq!(compute_check_digit(&base).unwrap(), 0);
    }

    #[test]
    fn check_digit_rejects_wrong_length() {
        assert_eq!(
            compute_check_digit("123"),
            Err(CdcError::InvalidLength {
                expected: 43,
                got: 3
            })
        );
        let too_long = "1".repeat(44);
        assert!(compute_check_digit(&too_long).is_err());
    }

    #[test]
    fn check_digit_rejects_non_numeric() {
        let base = format!("{}X", "1".repeat(42));
        assert_eq!(compute_check_digit(&base), Err(CdcError::NonNumeric));
    }

    #[test]
    fn validate_is_a_predicate() {
        assert!(validate_control_code(
            "12345678901234567890123456789012345678901235"
        ));
        assert!(!validate_control_code(
            "12345678901234567890123456789012345678901239"
        ));
        assert!(!validate_control_code("123")); // wrong length, no panic
        assert!(!validate_control_code("")); // empty, no panic
    }

    #[test]
    fn repair_replaces_trailing_digit() {
        let wrong = "12345678901234567890123456789012345678901239";
        let fixed = repair_control_code(wrong).unwrap();
        assert_eq!(fixed, "12345678901234567890123456789012345678901235");
        assert!(validate_control_code(&fixed));
        // Pure: repairing an already-correct code is a no-op.
        assert_eq!(repair_control_code(&fixed).unwrap(), fixed);
    }

    #[test]
    fn cdc_parse_accepts_only_consistent_codes() {
        let code = "12345678901234567890123456789012345678901235";
        let cdc = Cdc::parse(code).unwrap();
        assert_eq!(cdc.check_digit(), 5);
        assert_eq!(cdc.base().len(), 43);

        let bad = "12345678901234567890123456789012345678901230";
        assert!(Cdc::parse(bad).is_err());
    }

    #[test]
    fn builder_composes_44_digits() {
        let key = DocumentKey::new(
            Environment::Test,
            "80012345",
            "001",
            "001",
            DocumentType::FacturaElectronica,
        );
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let cdc = CdcBuilder::new(key, 42, date)
            .ruc_check_digit(7)
            .security_code(123_456_789)
            .build()
            .unwrap();
        assert_eq!(cdc.as_str().len(), 44);
        assert!(validate_control_code(cdc.as_str()));
        assert!(cdc.base().starts_with("01800123457001001"));
        assert!(cdc.base().contains("0000042"));
        assert!(cdc.base().contains("20240615"));
    }
}
