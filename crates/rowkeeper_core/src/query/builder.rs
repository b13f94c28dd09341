use super::Dialect;
use crate::config::{ConfigError, EntityConfiguration, PropertyConfiguration};
use crate::model::Entity;

const TARGET_ALIAS: &str = "t";
const LINK_ALIAS: &str = "l";

/// Stateless SQL generator for one entity type.
///
/// Column order follows property declaration order; key conditions follow
/// key order. Placeholders use property names, not column names.
pub struct QueryBuilder<'a, T> {
    configuration: &'a EntityConfiguration<T>,
    dialect: &'a dyn Dialect,
}

impl<'a, T: Entity> QueryBuilder<'a, T> {
    pub fn new(configuration: &'a EntityConfiguration<T>, dialect: &'a dyn Dialect) -> Self {
        Self {
            configuration,
            dialect,
        }
    }

    /// `INSERT INTO .. (..) VALUES (..)` over every non-generated property.
    pub fn insert(&self) -> String {
        let properties = self.configuration.insert_properties();
        if properties.is_empty() {
            return format!("INSERT INTO {} DEFAULT VALUES", self.table());
        }
        let columns: Vec<String> = properties.iter().map(|p| self.column(p)).collect();
        let values: Vec<String> = properties.iter().map(|p| self.placeholder(p)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table(),
            columns.join(", "),
            values.join(", ")
        )
    }

    /// `UPDATE .. SET <non-key columns> WHERE <key columns>`.
    ///
    /// # Errors
    /// - `MissingKey` when no key is configured.
    /// - `NothingToUpdate` when every column is a key or generated.
    pub fn update(&self) -> Result<String, ConfigError> {
        let keys = self.require_key()?;
        let assignments: Vec<String> = self
            .configuration
            .non_key_properties()
            .into_iter()
            .filter(|p| !p.is_generated())
            .map(|p| self.condition(p, None))
            .collect();
        if assignments.is_empty() {
            return Err(ConfigError::NothingToUpdate {
                entity: T::entity_name(),
            });
        }
        Ok(format!(
            "UPDATE {} SET {} WHERE {}",
            self.table(),
            assignments.join(", "),
            self.key_conditions(&keys)
        ))
    }

    /// `DELETE FROM .. WHERE <key columns>`.
    pub fn delete(&self) -> Result<String, ConfigError> {
        let keys = self.require_key()?;
        Ok(format!(
            "DELETE FROM {} WHERE {}",
            self.table(),
            self.key_conditions(&keys)
        ))
    }

    /// Every row, every column, ordered by key when one is configured.
    pub fn select_all(&self) -> String {
        let keys = self.configuration.key_properties();
        let mut sql = format!("SELECT {} FROM {}", self.select_list(), self.table());
        if !keys.is_empty() {
            let order: Vec<String> = keys.iter().map(|p| self.column(p)).collect();
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        sql
    }

    /// One row by its (possibly composite) key.
    pub fn select_by_key(&self) -> Result<String, ConfigError> {
        let keys = self.require_key()?;
        Ok(format!(
            "SELECT {} FROM {} WHERE {}",
            self.select_list(),
            self.table(),
            self.key_conditions(&keys)
        ))
    }

    /// Rows whose text `property` equals the bound value, ignoring case.
    /// Both sides are lower-cased in SQL; on SQLite `LOWER()` folds ASCII
    /// letters only.
    pub fn select_where_equals_ignore_case(&self, property: &str) -> Result<String, ConfigError> {
        let property = self.configuration.property(property)?;
        Ok(format!(
            "SELECT {} FROM {} WHERE LOWER({}) = LOWER({})",
            self.select_list(),
            self.table(),
            self.column(property),
            self.placeholder(property)
        ))
    }

    /// Single-column projection filtered by equality on another property.
    pub fn select_values_where(
        &self,
        value_property: &str,
        filter_property: &str,
    ) -> Result<String, ConfigError> {
        let value = self.configuration.property(value_property)?;
        let filter = self.configuration.property(filter_property)?;
        Ok(format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}",
            self.column(value),
            self.table(),
            self.condition(filter, None),
            self.column(value)
        ))
    }

    /// Single-column projection reached through a link entity.
    ///
    /// Selects `value_property` of every row of this entity whose key is
    /// referenced by `link_target` on a link row whose `link_filter`
    /// equals the bound value, e.g. role names by user id through a
    /// user-role link table.
    pub fn select_values_through<L: Entity>(
        &self,
        value_property: &str,
        link: &EntityConfiguration<L>,
        link_target: &str,
        link_filter: &str,
    ) -> Result<String, ConfigError> {
        let value = self.configuration.property(value_property)?;
        let key = self.single_key()?;
        let target = link.property(link_target)?;
        let filter = link.property(link_filter)?;
        let value_column = self.qualified(TARGET_ALIAS, value);
        Ok(format!(
            "SELECT {value_column} FROM {} {TARGET_ALIAS} INNER JOIN {} {LINK_ALIAS} ON {} = {} WHERE {} ORDER BY {value_column}",
            self.table(),
            self.dialect.quote_identifier(link.table_name()),
            self.qualified(LINK_ALIAS, target),
            self.qualified(TARGET_ALIAS, key),
            self.condition(filter, Some(LINK_ALIAS)),
        ))
    }

    /// Placeholder text bound for `property`, e.g. `:Name`.
    pub fn placeholder(&self, property: &PropertyConfiguration) -> String {
        format!(
            "{}{}",
            self.dialect.parameter_prefix(),
            property.property_name()
        )
    }

    fn table(&self) -> String {
        self.dialect.quote_identifier(self.configuration.table_name())
    }

    fn column(&self, property: &PropertyConfiguration) -> String {
        self.dialect.quote_identifier(property.column_name())
    }

    fn qualified(&self, alias: &str, property: &PropertyConfiguration) -> String {
        format!("{alias}.{}", self.column(property))
    }

    fn condition(&self, property: &PropertyConfiguration, alias: Option<&str>) -> String {
        let column = match alias {
            Some(alias) => self.qualified(alias, property),
            None => self.column(property),
        };
        format!("{column} = {}", self.placeholder(property))
    }

    fn key_conditions(&self, keys: &[&PropertyConfiguration]) -> String {
        keys.iter()
            .map(|p| self.condition(p, None))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn select_list(&self) -> String {
        self.configuration
            .properties()
            .iter()
            .map(|p| self.column(p))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn require_key(&self) -> Result<Vec<&'a PropertyConfiguration>, ConfigError> {
        let keys = self.configuration.key_properties();
        if keys.is_empty() {
            return Err(ConfigError::MissingKey {
                entity: T::entity_name(),
            });
        }
        Ok(keys)
    }

    fn single_key(&self) -> Result<&'a PropertyConfiguration, ConfigError> {
        let keys = self.require_key()?;
        match keys.as_slice() {
            [key] => Ok(*key),
            _ => Err(ConfigError::CompositeKeyUnsupported {
                entity: T::entity_name(),
            }),
        }
    }
}
