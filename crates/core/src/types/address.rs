//! Brazilian postal addresses.

use serde::{Deserialize, Serialize};

use super::AddressId;

/// Errors that can occur when validating a [`NewAddress`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// A required field is blank.
    #[error("{0} is required")]
    MissingField(&'static str),
    /// The CEP does not have 8 digits.
    #[error("CEP must have 8 digits")]
    InvalidCep,
    /// The state is not a two-letter UF code.
    #[error("estado must be a two-letter UF code")]
    InvalidEstado,
}

/// A saved shipping address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Database ID. Absent for addresses that have not been saved yet.
    pub id: Option<AddressId>,
    pub rua: String,
    pub numero: String,
    pub complemento: Option<String>,
    pub bairro: String,
    pub cidade: String,
    pub estado: String,
    /// Digits only, e.g. `01310100`.
    pub cep: String,
    #[serde(default)]
    pub is_default: bool,
}

/// An address as entered in the checkout form, before it is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAddress {
    pub rua: String,
    pub numero: String,
    #[serde(default)]
    pub complemento: Option<String>,
    pub bairro: String,
    pub cidade: String,
    pub estado: String,
    pub cep: String,
    #[serde(default)]
    pub is_default: bool,
}

impl NewAddress {
    /// Validate and normalize the form input.
    ///
    /// Trims every field, drops an empty `complemento`, strips punctuation
    /// from the CEP and uppercases the UF.
    ///
    /// # Errors
    ///
    /// Returns `AddressError` for the first field that fails validation.
    pub fn validate(self) -> Result<Self, AddressError> {
        let required = |value: String, name: &'static str| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                Err(AddressError::MissingField(name))
            } else {
                Ok(trimmed)
            }
        };

        let rua = required(self.rua, "rua")?;
        let numero = required(self.numero, "numero")?;
        let bairro = required(self.bairro, "bairro")?;
        let cidade = required(self.cidade, "cidade")?;
        let estado = required(self.estado, "estado")?.to_uppercase();
        let cep: String = required(self.cep, "cep")?
            .chars()
            .filter(char::is_ascii_digit)
            .collect();

        if cep.len() != 8 {
            return Err(AddressError::InvalidCep);
        }
        if estado.len() != 2 || !estado.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(AddressError::InvalidEstado);
        }

        let complemento = self
            .complemento
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(Self {
            rua,
            numero,
            complemento,
            bairro,
            cidade,
            estado,
            cep,
            is_default: self.is_default,
        })
    }
}

impl Address {
    /// Single-line rendering used in order records and receipts.
    #[must_use]
    pub fn one_line(&self) -> String {
        let complemento = self
            .complemento
            .as_deref()
            .map(|c| format!(" {c}"))
            .unwrap_or_default();
        format!(
            "{}, {}{} - {}, {}/{} - CEP {}",
            self.rua, self.numero, complemento, self.bairro, self.cidade, self.estado, self.cep
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn form() -> NewAddress {
        NewAddress {
            rua: " Av. Paulista ".to_string(),
            numero: "1000".to_string(),
            complemento: Some("  ".to_string()),
            bairro: "Bela Vista".to_string(),
            cidade: "São Paulo".to_string(),
            estado: "sp".to_string(),
            cep: "01310-100".to_string(),
            is_default: false,
        }
    }

    #[test]
    fn test_validate_normalizes() {
        let address = form().validate().unwrap();
        assert_eq!(address.rua, "Av. Paulista");
        assert_eq!(address.estado, "SP");
        assert_eq!(address.cep, "01310100");
        assert_eq!(address.complemento, None);
    }

    #[test]
    fn test_validate_missing_field() {
        let mut input = form();
        input.bairro = String::new();
        assert_eq!(
            input.validate().unwrap_err(),
            AddressError::MissingField("bairro")
        );
    }

    #[test]
    fn test_validate_short_cep() {
        let mut input = form();
        input.cep = "1234".to_string();
        assert_eq!(input.validate().unwrap_err(), AddressError::InvalidCep);
    }

    #[test]
    fn test_one_line() {
        let address = Address {
            id: None,
            rua: "Rua A".to_string(),
            numero: "10".to_string(),
            complemento: Some("apto 3".to_string()),
            bairro: "Centro".to_string(),
            cidade: "Recife".to_string(),
            estado: "PE".to_string(),
            cep: "50000000".to_string(),
            is_default: true,
        };
        assert_eq!(
            address.one_line(),
            "Rua A, 10 apto 3 - Centro, Recife/PE - CEP 50000000"
        );
    }
}
