//! Address repository.

use sqlx::PgPool;
use tracing::instrument;

use versos_core::{Address, AddressId, NewAddress, UserId};

use super::RepositoryError;

#[derive(sqlx::FromRow)]
struct AddressRow {
    id: i32,
    rua: String,
    numero: String,
    complemento: Option<String>,
    bairro: String,
    cidade: String,
    estado: String,
    cep: String,
    is_default: bool,
}

impl From<AddressRow> for Address {
    fn from(row: AddressRow) -> Self {
        Self {
            id: Some(AddressId::new(row.id)),
            rua: row.rua,
            numero: row.numero,
            complemento: row.complemento,
            bairro: row.bairro,
            cidade: row.cidade,
            estado: row.estado,
            cep: row.cep,
            is_default: row.is_default,
        }
    }
}

/// Repository for a user's saved addresses.
pub struct AddressRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> AddressRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// List a user's addresses, default first, then newest.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Address>, RepositoryError> {
        let rows = sqlx::query_as::<_, AddressRow>(
            r"
            SELECT id, rua, numero, complemento, bairro, cidade, estado, cep, is_default
            FROM addresses
            WHERE user_id = $1
            ORDER BY is_default DESC, created_at DESC
            ",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows.into_iter().map(Address::from).collect())
    }

    /// Insert a validated address for a user.
    ///
    /// When the new address is marked default, the user's other addresses lose
    /// their default flag in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    #[instrument(skip(self, address))]
    pub async fn create(
        &self,
        user_id: UserId,
        address: &NewAddress,
    ) -> Result<Address, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if address.is_default {
            sqlx::query("UPDATE addresses SET is_default = FALSE WHERE user_id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        let row = sqlx::query_as::<_, AddressRow>(
            r"
            INSERT INTO addresses
                (user_id, rua, numero, complemento, bairro, cidade, estado, cep, is_default)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, rua, numero, complemento, bairro, cidade, estado, cep, is_default
            ",
        )
        .bind(user_id)
        .bind(&address.rua)
        .bind(&address.numero)
        .bind(address.complemento.as_deref())
        .bind(&address.bairro)
        .bind(&address.cidade)
        .bind(&address.estado)
        .bind(&address.cep)
        .bind(address.is_default)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.into())
    }
}
