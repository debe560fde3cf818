use sea_orm_migration::{prelude::*, sea_orm::DatabaseBackend};

pub struct Migrator;

/// Money column, 4 decimal places.
///
/// SQLite rejects a declared precision above 16 and stores the value as
/// REAL; amounts are read back through the shortest decimal form, which is
/// exact for 4-place values below 10^11.
fn money_column<T: IntoIden>(manager: &SchemaManager, column: T) -> ColumnDef {
    let mut def = ColumnDef::new(column);
    match manager.get_database_backend() {
        DatabaseBackend::Sqlite => def.decimal_len(16, 4),
        _ => def.decimal_len(19, 4),
    };
    def
}

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_identity_tables::Migration),
            Box::new(m20240301_000002_create_catalog_services_table::Migration),
            Box::new(m20240301_000003_create_applications_table::Migration),
            Box::new(m20240301_000004_create_billing_tables::Migration),
            Box::new(m20240301_000005_create_application_events_table::Migration),
            Box::new(m20240301_000006_create_otp_codes_table::Migration),
            Box::new(m20240301_000007_create_document_sequences_table::Migration),
        ]
    }
}

mod m20240301_000001_create_identity_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_identity_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(AuthUsers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(AuthUsers::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(AuthUsers::Email).string().not_null())
                        .col(ColumnDef::new(AuthUsers::PasswordHash).string().null())
                        .col(ColumnDef::new(AuthUsers::Phone).string().null())
                        .col(
                            ColumnDef::new(AuthUsers::EmailConfirmed)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(AuthUsers::Metadata).json().not_null())
                        .col(
                            ColumnDef::new(AuthUsers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(AuthUsers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Linking collisions surface as unique violations on this index
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_auth_users_email")
                        .table(AuthUsers::Table)
                        .col(AuthUsers::Email)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Customers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Customers::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Customers::UserId).uuid().null())
                        .col(ColumnDef::new(Customers::Name).string().null())
                        .col(ColumnDef::new(Customers::Email).string().null())
                        .col(ColumnDef::new(Customers::Phone).string().null())
                        .col(
                            ColumnDef::new(Customers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Customers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_customers_user_id")
                                .from(Customers::Table, Customers::UserId)
                                .to(AuthUsers::Table, AuthUsers::Id)
                                .on_delete(ForeignKeyAction::SetNull),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_customers_user_id")
                        .table(Customers::Table)
                        .col(Customers::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Customers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(AuthUsers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum AuthUsers {
        Table,
        Id,
        Email,
        PasswordHash,
        Phone,
        EmailConfirmed,
        Metadata,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Customers {
        Table,
        Id,
        UserId,
        Name,
        Email,
        Phone,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_catalog_services_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_catalog_services_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CatalogServices::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CatalogServices::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CatalogServices::Slug).string().not_null())
                        .col(ColumnDef::new(CatalogServices::Name).string().not_null())
                        .col(super::money_column(manager, CatalogServices::Price).null())
                        .col(
                            ColumnDef::new(CatalogServices::QuoteOnly)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(CatalogServices::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(CatalogServices::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_catalog_services_slug")
                        .table(CatalogServices::Table)
                        .col(CatalogServices::Slug)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CatalogServices::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CatalogServices {
        Table,
        Id,
        Slug,
        Name,
        Price,
        QuoteOnly,
        Active,
        CreatedAt,
    }
}

mod m20240301_000003_create_applications_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_applications_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Applications::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Applications::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Applications::ServiceSlug).string().not_null())
                        .col(
                            ColumnDef::new(Applications::Status)
                                .string_len(32)
                                .not_null()
                                .default("draft"),
                        )
                        .col(ColumnDef::new(Applications::ApplicantName).string().null())
                        .col(ColumnDef::new(Applications::ApplicantEmail).string().null())
                        .col(ColumnDef::new(Applications::ApplicantPhone).string().null())
                        .col(ColumnDef::new(Applications::CustomerId).uuid().null())
                        .col(ColumnDef::new(Applications::Payload).json().not_null())
                        .col(ColumnDef::new(Applications::OrderNumber).string().null())
                        .col(
                            ColumnDef::new(Applications::SubmittedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Applications::LastEventAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Applications::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Applications::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Order numbers are assigned once; NULLs are not considered equal
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_applications_order_number")
                        .table(Applications::Table)
                        .col(Applications::OrderNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_applications_status")
                        .table(Applications::Table)
                        .col(Applications::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Applications::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Applications {
        Table,
        Id,
        ServiceSlug,
        Status,
        ApplicantName,
        ApplicantEmail,
        ApplicantPhone,
        CustomerId,
        Payload,
        OrderNumber,
        SubmittedAt,
        LastEventAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000004_create_billing_tables {
    use super::m20240301_000003_create_applications_table::Applications;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_billing_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Invoices::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Invoices::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Invoices::ApplicationId).uuid().not_null())
                        .col(ColumnDef::new(Invoices::InvoiceNumber).string().not_null())
                        .col(ColumnDef::new(Invoices::Kind).string_len(16).not_null())
                        .col(super::money_column(manager, Invoices::Amount).not_null())
                        .col(ColumnDef::new(Invoices::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Invoices::Status).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Invoices::DueDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Invoices::PaymentSessionId).string().null())
                        .col(ColumnDef::new(Invoices::PaymentLink).text().null())
                        .col(ColumnDef::new(Invoices::Gateway).string().null())
                        .col(ColumnDef::new(Invoices::TransactionId).string().null())
                        .col(
                            ColumnDef::new(Invoices::PaidAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_invoices_application_id")
                                .from(Invoices::Table, Invoices::ApplicationId)
                                .to(Applications::Table, Applications::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_invoices_invoice_number")
                        .table(Invoices::Table)
                        .col(Invoices::InvoiceNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_invoices_application_id")
                        .table(Invoices::Table)
                        .col(Invoices::ApplicationId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Payments::InvoiceId).uuid().not_null())
                        .col(ColumnDef::new(Payments::Gateway).string().not_null())
                        .col(ColumnDef::new(Payments::TransactionId).string().not_null())
                        .col(super::money_column(manager, Payments::Amount).not_null())
                        .col(ColumnDef::new(Payments::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Payments::Status).string_len(16).not_null())
                        .col(ColumnDef::new(Payments::RawResponse).json().not_null())
                        .col(
                            ColumnDef::new(Payments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_invoice_id")
                                .from(Payments::Table, Payments::InvoiceId)
                                .to(Invoices::Table, Invoices::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            // One settlement row per gateway transaction
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_gateway_transaction")
                        .table(Payments::Table)
                        .col(Payments::Gateway)
                        .col(Payments::TransactionId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Invoices::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
        ApplicationId,
        InvoiceNumber,
        Kind,
        Amount,
        Currency,
        Status,
        DueDate,
        PaymentSessionId,
        PaymentLink,
        Gateway,
        TransactionId,
        PaidAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        InvoiceId,
        Gateway,
        TransactionId,
        Amount,
        Currency,
        Status,
        RawResponse,
        CreatedAt,
    }
}

mod m20240301_000005_create_application_events_table {
    use super::m20240301_000003_create_applications_table::Applications;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_application_events_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ApplicationEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ApplicationEvents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ApplicationEvents::ApplicationId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ApplicationEvents::EventType)
                                .string_len(64)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ApplicationEvents::Notes).text().null())
                        .col(ColumnDef::new(ApplicationEvents::Data).json().null())
                        .col(ColumnDef::new(ApplicationEvents::Actor).string().not_null())
                        .col(
                            ColumnDef::new(ApplicationEvents::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_application_events_application_id")
                                .from(ApplicationEvents::Table, ApplicationEvents::ApplicationId)
                                .to(Applications::Table, Applications::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_application_events_application_id")
                        .table(ApplicationEvents::Table)
                        .col(ApplicationEvents::ApplicationId)
                        .col(ApplicationEvents::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ApplicationEvents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ApplicationEvents {
        Table,
        Id,
        ApplicationId,
        EventType,
        Notes,
        Data,
        Actor,
        CreatedAt,
    }
}

mod m20240301_000006_create_otp_codes_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_otp_codes_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OtpCodes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OtpCodes::Phone)
                                .string_len(32)
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OtpCodes::Code).string_len(6).not_null())
                        .col(
                            ColumnDef::new(OtpCodes::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OtpCodes::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OtpCodes::Attempts)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(OtpCodes::BlockedUntil)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(OtpCodes::LastSentAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OtpCodes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OtpCodes {
        Table,
        Phone,
        Code,
        ExpiresAt,
        CreatedAt,
        Attempts,
        BlockedUntil,
        LastSentAt,
    }
}

mod m20240301_000007_create_document_sequences_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000007_create_document_sequences_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(DocumentSequences::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DocumentSequences::Scope)
                                .string_len(8)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DocumentSequences::DayKey)
                                .string_len(8)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(DocumentSequences::LastValue)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(DocumentSequences::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(DocumentSequences::Scope)
                                .col(DocumentSequences::DayKey),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DocumentSequences::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum DocumentSequences {
        Table,
        Scope,
        DayKey,
        LastValue,
        UpdatedAt,
    }
}
