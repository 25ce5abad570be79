use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Users::Username).string().not_null().unique_key())
                    .col(ColumnDef::new(Users::Email).string().not_null().unique_key())
                    .col(ColumnDef::new(Users::PasswordHash).string().not_null())
                    .col(
                        ColumnDef::new(Users::Role)
                            .string()
                            .not_null()
                            .default("user"),
                    )
                    .col(ColumnDef::new(Users::Name).string())
                    .col(ColumnDef::new(Users::Birthdate).string())
                    .col(ColumnDef::new(Users::Phone).string())
                    .col(ColumnDef::new(Users::Address).string())
                    .col(
                        ColumnDef::new(Users::IsEmailVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Users::EmailVerifyToken).string())
                    .col(ColumnDef::new(Users::EmailVerifyExpiry).timestamp_with_time_zone())
                    .col(ColumnDef::new(Users::PasswordResetToken).string())
                    .col(ColumnDef::new(Users::PasswordResetExpiry).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Users::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-users-email_verify_token")
                    .table(Users::Table)
                    .col(Users::EmailVerifyToken)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx-users-password_reset_token")
                    .table(Users::Table)
                    .col(Users::PasswordResetToken)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Users {
    Table,
    Id,
    Username,
    Email,
    PasswordHash,
    Role,
    Name,
    Birthdate,
    Phone,
    Address,
    IsEmailVerified,
    EmailVerifyToken,
    EmailVerifyExpiry,
    PasswordResetToken,
    PasswordResetExpiry,
    CreatedAt,
    UpdatedAt,
}
