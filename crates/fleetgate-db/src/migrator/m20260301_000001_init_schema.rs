//! Nodes, tunnels and rules

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ============================================================
        // 1. nodes
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Node::Table)
                    .if_not_exists()
                    .col(pk_auto(Node::Id))
                    .col(string_len(Node::Name, 100).unique_key())
                    .col(string_len(Node::Address, 255))
                    .col(integer(Node::Port))
                    .col(string_len_null(Node::Username, 50))
                    .col(string_len_null(Node::Password, 255))
                    .col(string_len(Node::Status, 20).default("offline"))
                    .col(big_integer(Node::TotalBytes).default(0))
                    .col(big_integer(Node::InputBytes).default(0))
                    .col(big_integer(Node::OutputBytes).default(0))
                    .col(timestamp_with_time_zone_null(Node::LastCheckAt))
                    .col(text_null(Node::Remark))
                    .col(
                        timestamp_with_time_zone(Node::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Node::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_nodes_status")
                    .table(Node::Table)
                    .col(Node::Status)
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 2. tunnels
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Tunnel::Table)
                    .if_not_exists()
                    .col(pk_auto(Tunnel::Id))
                    .col(string_len(Tunnel::Name, 100))
                    .col(integer(Tunnel::EntryNodeId))
                    .col(integer(Tunnel::ExitNodeId))
                    .col(string_len(Tunnel::Protocol, 10).default("tcp"))
                    .col(integer(Tunnel::RelayPort))
                    .col(string_len(Tunnel::Status, 20).default("stopped"))
                    .col(string_len_null(Tunnel::ServiceId, 100))
                    .col(string_len_null(Tunnel::ChainId, 100))
                    .col(string_len_null(Tunnel::RelayAddr, 255))
                    .col(text_null(Tunnel::Remark))
                    .col(
                        timestamp_with_time_zone(Tunnel::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Tunnel::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tunnels_entry_node_id")
                            .from(Tunnel::Table, Tunnel::EntryNodeId)
                            .to(Node::Table, Node::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tunnels_exit_node_id")
                            .from(Tunnel::Table, Tunnel::ExitNodeId)
                            .to(Node::Table, Node::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tunnels_entry_node_id")
                    .table(Tunnel::Table)
                    .col(Tunnel::EntryNodeId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tunnels_exit_node_id")
                    .table(Tunnel::Table)
                    .col(Tunnel::ExitNodeId)
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 3. rules
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Rule::Table)
                    .if_not_exists()
                    .col(pk_auto(Rule::Id))
                    .col(string_len(Rule::Name, 100))
                    .col(string_len(Rule::RuleType, 20).default("forward"))
                    .col(integer_null(Rule::NodeId))
                    .col(integer_null(Rule::TunnelId))
                    .col(integer(Rule::EntryNodeId))
                    .col(string_len(Rule::Protocol, 10).default("tcp"))
                    .col(integer(Rule::ListenPort))
                    .col(text(Rule::Targets))
                    .col(string_len(Rule::Strategy, 20).default("round"))
                    .col(boolean(Rule::EnableTls).default(false))
                    .col(string_len(Rule::Status, 20).default("stopped"))
                    .col(string_len_null(Rule::ServiceId, 100))
                    .col(string_len_null(Rule::ObserverId, 100))
                    .col(big_integer(Rule::InputBytes).default(0))
                    .col(big_integer(Rule::OutputBytes).default(0))
                    .col(big_integer(Rule::TotalBytes).default(0))
                    .col(big_integer(Rule::TotalRequests).default(0))
                    .col(text_null(Rule::Remark))
                    .col(
                        timestamp_with_time_zone(Rule::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Rule::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    // Referenced nodes and tunnels cannot be deleted
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_rules_node_id")
                            .from(Rule::Table, Rule::NodeId)
                            .to(Node::Table, Node::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_rules_tunnel_id")
                            .from(Rule::Table, Rule::TunnelId)
                            .to(Tunnel::Table, Tunnel::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_rules_entry_node_id")
                            .from(Rule::Table, Rule::EntryNodeId)
                            .to(Node::Table, Node::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // A port can be bound once per entry node
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_rules_entry_node_port")
                    .table(Rule::Table)
                    .col(Rule::EntryNodeId)
                    .col(Rule::ListenPort)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_rules_tunnel_id")
                    .table(Rule::Table)
                    .col(Rule::TunnelId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Rule::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tunnel::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Node::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Node {
    #[sea_orm(iden = "nodes")]
    Table,
    Id,
    Name,
    Address,
    Port,
    Username,
    Password,
    Status,
    TotalBytes,
    InputBytes,
    OutputBytes,
    LastCheckAt,
    Remark,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tunnel {
    #[sea_orm(iden = "tunnels")]
    Table,
    Id,
    Name,
    EntryNodeId,
    ExitNodeId,
    Protocol,
    RelayPort,
    Status,
    ServiceId,
    ChainId,
    RelayAddr,
    Remark,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Rule {
    #[sea_orm(iden = "rules")]
    Table,
    Id,
    Name,
    RuleType,
    NodeId,
    TunnelId,
    EntryNodeId,
    Protocol,
    ListenPort,
    Targets,
    Strategy,
    EnableTls,
    Status,
    ServiceId,
    ObserverId,
    InputBytes,
    OutputBytes,
    TotalBytes,
    TotalRequests,
    Remark,
    CreatedAt,
    UpdatedAt,
}
