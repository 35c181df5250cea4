pub mod orders;
pub mod refunds;
pub mod reviews;

#[cfg(test)]
pub(crate) mod test_support {
    use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Schema};

    use crate::entities::{order, order_item, product_review};

    /// Connects to an in-memory SQLite database and creates the schema
    /// directly from the entity definitions.
    pub async fn setup_db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("connect in-memory sqlite");

        let backend = db.get_database_backend();
        let schema = Schema::new(backend);

        for stmt in [
            schema.create_table_from_entity(order::Entity),
            schema.create_table_from_entity(order_item::Entity),
            schema.create_table_from_entity(product_review::Entity),
        ] {
            db.execute(backend.build(&stmt))
                .await
                .expect("create table");
        }

        db
    }
}
