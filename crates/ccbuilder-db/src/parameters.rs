//! Chain parameter canonicalization.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use ccbuilder_core::{new_v7, ChainParameters, Error, ParameterRepository, Result};

/// PostgreSQL implementation of ParameterRepository.
#[derive(Clone)]
pub struct PgParameterRepository {
    pool: Pool<Postgres>,
}

impl PgParameterRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Find the id of a record equal to `params` in every column.
    async fn find_equal(&self, params: &ChainParameters) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM chain_parameters
             WHERE radius = $1 AND pitch = $2 AND interface_angle = $3
               AND register = $4 AND sequence = $5 AND orientation = $6
               AND z_shift = $7 AND super_helical_rotation = $8 AND linked_shr = $9",
        )
        .bind(params.radius)
        .bind(params.pitch)
        .bind(params.interface_angle)
        .bind(params.register.as_str())
        .bind(&params.sequence)
        .bind(params.orientation)
        .bind(params.z_shift)
        .bind(params.super_helical_rotation)
        .bind(params.linked_shr)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    fn parse_row(row: PgRow) -> Result<ChainParameters> {
        let register: String = row.try_get("register")?;
        Ok(ChainParameters {
            radius: row.try_get("radius")?,
            pitch: row.try_get("pitch")?,
            interface_angle: row.try_get("interface_angle")?,
            register: register.parse()?,
            sequence: row.try_get("sequence")?,
            orientation: row.try_get("orientation")?,
            z_shift: row.try_get("z_shift")?,
            super_helical_rotation: row.try_get("super_helical_rotation")?,
            linked_shr: row.try_get("linked_shr")?,
        })
    }
}

#[async_trait]
impl ParameterRepository for PgParameterRepository {
    async fn lookup_or_insert(&self, params: &ChainParameters) -> Result<Uuid> {
        if let Some(id) = self.find_equal(params).await? {
            return Ok(id);
        }

        // A concurrent insert of the same content loses on the content key
        // and falls through to the second lookup.
        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO chain_parameters
                (id, radius, pitch, interface_angle, register, sequence,
                 orientation, z_shift, super_helical_rotation, linked_shr)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT ON CONSTRAINT chain_parameters_content_key DO NOTHING
             RETURNING id",
        )
        .bind(new_v7())
        .bind(params.radius)
        .bind(params.pitch)
        .bind(params.interface_angle)
        .bind(params.register.as_str())
        .bind(&params.sequence)
        .bind(params.orientation)
        .bind(params.z_shift)
        .bind(params.super_helical_rotation)
        .bind(params.linked_shr)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            debug!(subsystem = "db", component = "parameters", %id, "Stored new chain parameters");
            return Ok(id);
        }

        self.find_equal(params).await?.ok_or_else(|| {
            Error::Internal("chain parameters vanished after conflicting insert".to_string())
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<ChainParameters>> {
        let row = sqlx::query(
            "SELECT radius, pitch, interface_angle, register, sequence,
                    orientation, z_shift, super_helical_rotation, linked_shr
             FROM chain_parameters WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::parse_row).transpose()
    }
}
