//! Compiler tests: SQL text, clause order and parameter order.

use super::*;
use crate::value::{RowData, func, inc, now};
use crate::{Op, row};

fn mysql() -> CompileContext<'static> {
    CompileContext::new(Dialect::MySql)
}

fn pg() -> CompileContext<'static> {
    CompileContext::new(Dialect::Postgres).with_insert_id_column(Some("id"))
}

fn placeholders(sql: &str) -> usize {
    sql.matches('?').count()
}

#[test]
fn test_select_basic() {
    let qb = QueryBuilder::new();
    let stmt = qb.compile_select(&mysql(), "users", &[], Limit::All).unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM users");
    assert!(stmt.params.is_empty());
}

#[test]
fn test_select_full_clause_order() {
    let mut qb = QueryBuilder::new();
    qb.join_params("orders o", "o.user_id = u.id AND o.state = ?", vec!["paid".into()], JoinKind::Left)
        .where_("u.active", true)
        .where_op("u.age", Op::Gte, 18)
        .group_by("u.id")
        .having_op("COUNT(o.id)", Op::Gt, 2)
        .order_by("u.created_at", Order::Desc)
        .order_by("u.id", Order::Asc)
        .for_update();

    let stmt = qb
        .compile_select(&mysql(), "users u", &["u.id", "COUNT(o.id) AS n"], Limit::from((20, 10)))
        .unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT u.id, COUNT(o.id) AS n FROM users u \
         LEFT JOIN orders o ON o.user_id = u.id AND o.state = ? \
         WHERE u.active = ? AND u.age >= ? \
         GROUP BY u.id HAVING COUNT(o.id) > ? \
         ORDER BY u.created_at DESC, u.id ASC LIMIT 20, 10 FOR UPDATE"
    );
    // join params first, then WHERE, then HAVING
    assert_eq!(
        stmt.params,
        vec![
            Value::from("paid"),
            Value::Bool(true),
            Value::Int(18),
            Value::Int(2),
        ]
    );
    assert_eq!(placeholders(&stmt.sql), stmt.params.len());
}

#[test]
fn test_postgres_numbering_and_limit() {
    let mut qb = QueryBuilder::new();
    qb.where_("status", "active")
        .or_where_op("id", Op::In, vec![1, 2, 3])
        .lock_in_share_mode();
    let stmt = qb
        .compile_select(&pg(), "users", &[], Limit::from((40, 20)))
        .unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users WHERE status = $1 OR id IN ($2, $3, $4) LIMIT 20 OFFSET 40 FOR SHARE"
    );
    assert_eq!(stmt.params.len(), 4);
}

#[test]
fn test_in_list_binds_in_order() {
    let mut qb = QueryBuilder::new();
    qb.where_op("id", Op::In, vec!["a", "b", "c"]);
    let stmt = qb.compile_select(&mysql(), "t", &[], Limit::All).unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM t WHERE id IN (?, ?, ?)");
    assert_eq!(
        stmt.params,
        vec![Value::from("a"), Value::from("b"), Value::from("c")]
    );
}

#[test]
fn test_empty_in_list_fails() {
    let mut qb = QueryBuilder::new();
    qb.where_op("id", Op::In, Vec::<i32>::new());
    let err = qb.compile_select(&mysql(), "t", &[], Limit::All).unwrap_err();
    assert!(matches!(err, BuilderError::InvalidArgument(_)));
}

#[test]
fn test_terminal_limit_overrides_fluent_limit() {
    let mut qb = QueryBuilder::new();
    qb.limit(5);
    let stmt = qb.compile_select(&mysql(), "t", &[], Limit::All).unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM t LIMIT 5");
    let stmt = qb.compile_select(&mysql(), "t", &[], Limit::from(1)).unwrap();
    assert_eq!(stmt.sql, "SELECT * FROM t LIMIT 1");
}

#[test]
fn test_sub_query_params_splice_in_place() {
    let mut sub = SubQueryBuilder::new(Dialect::Postgres, None);
    let ids = sub
        .where_("country", "NL")
        .get("customers", Limit::All, &["id"])
        .unwrap();

    let mut qb = QueryBuilder::new();
    qb.where_("state", "open")
        .where_op("customer_id", Op::In, ids)
        .where_op("total", Op::Gt, 100);
    let stmt = qb.compile_select(&pg(), "orders", &[], Limit::All).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM orders WHERE state = $1 AND customer_id IN \
         (SELECT id FROM customers WHERE country = $2) AND total > $3"
    );
    assert_eq!(
        stmt.params,
        vec![Value::from("open"), Value::from("NL"), Value::Int(100)]
    );
}

#[test]
fn test_join_sub_query_needs_alias() {
    let sub = SubQueryBuilder::new(Dialect::MySql, None)
        .get("orders", Limit::All, &["user_id"])
        .unwrap();
    let mut qb = QueryBuilder::new();
    qb.join(sub, "o.user_id = u.id", JoinKind::Inner);
    assert!(qb.compile_select(&mysql(), "users u", &[], Limit::All).is_err());

    let sub = SubQueryBuilder::new(Dialect::MySql, Some("o"))
        .where_("paid", true)
        .get("orders", Limit::All, &["user_id"])
        .unwrap();
    let mut qb = QueryBuilder::new();
    qb.join(sub, "o.user_id = u.id", JoinKind::Inner)
        .where_("u.active", 1);
    let stmt = qb.compile_select(&mysql(), "users u", &[], Limit::All).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users u INNER JOIN (SELECT user_id FROM orders WHERE paid = ?) o \
         ON o.user_id = u.id WHERE u.active = ?"
    );
    assert_eq!(stmt.params, vec![Value::Bool(true), Value::Int(1)]);
}

#[test]
fn test_join_where_extends_on_clause() {
    let mut qb = QueryBuilder::new();
    qb.join("products p", "p.tenant_id = u.tenant_id", JoinKind::Left)
        .join_where("products p", "p.active", Op::Eq, true)
        .join_or_where("products p", "p.featured", Op::Eq, 1)
        .where_("u.id", 9);
    let stmt = qb.compile_select(&mysql(), "users u", &[], Limit::All).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM users u LEFT JOIN products p ON (p.tenant_id = u.tenant_id) \
         AND p.active = ? OR p.featured = ? WHERE u.id = ?"
    );
    assert_eq!(
        stmt.params,
        vec![Value::Bool(true), Value::Int(1), Value::Int(9)]
    );

    let mut qb = QueryBuilder::new();
    qb.join_where("missing", "x", Op::Eq, 1);
    assert!(qb.compile_select(&mysql(), "t", &[], Limit::All).is_err());
}

#[test]
fn test_table_prefix_applies_to_tables() {
    let mut qb = QueryBuilder::new();
    qb.join("orders o", "o.user_id = u.id", JoinKind::Inner);
    let ctx = mysql().with_prefix("app_");
    let stmt = qb.compile_select(&ctx, "users u", &[], Limit::All).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM app_users u INNER JOIN app_orders o ON o.user_id = u.id"
    );
}

#[test]
fn test_query_options() {
    let mut qb = QueryBuilder::new();
    qb.set_query_options(&["sql_no_cache", "DISTINCT"]);
    let stmt = qb.compile_select(&mysql(), "t", &["a"], Limit::All).unwrap();
    assert_eq!(stmt.sql, "SELECT SQL_NO_CACHE DISTINCT a FROM t");

    // SQL_NO_CACHE has no Postgres equivalent
    assert!(qb.compile_select(&pg(), "t", &["a"], Limit::All).is_err());

    let mut qb = QueryBuilder::new();
    qb.set_query_option("HOLD_MY_BEER");
    assert!(matches!(
        qb.compile_select(&mysql(), "t", &[], Limit::All),
        Err(BuilderError::InvalidArgument(_))
    ));
}

#[test]
fn test_total_count_statements() {
    let mut qb = QueryBuilder::new();
    qb.where_("a", 1).with_total_count();
    let select = qb.compile_select(&mysql(), "t", &[], Limit::from(10)).unwrap();
    assert_eq!(select.sql, "SELECT SQL_CALC_FOUND_ROWS * FROM t WHERE a = ? LIMIT 10");
    let count = qb.compile_count(&mysql(), "t").unwrap();
    assert_eq!(count.sql, "SELECT FOUND_ROWS()");

    let count = qb.compile_count(&pg(), "t").unwrap();
    assert_eq!(
        count.sql,
        "SELECT COUNT(*) FROM (SELECT 1 FROM t WHERE a = $1) AS total_rows"
    );
    assert_eq!(count.params, vec![Value::Int(1)]);
}

#[test]
fn test_order_by_values() {
    let mut qb = QueryBuilder::new();
    qb.where_("a", 1)
        .order_by_values("status", ["new", "open"], Order::Asc);
    let stmt = qb.compile_select(&pg(), "t", &[], Limit::All).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT * FROM t WHERE a = $1 ORDER BY CASE status WHEN $2 THEN 0 WHEN $3 THEN 1 ELSE 2 END ASC"
    );
}

// ── INSERT ──

#[test]
fn test_insert_basic() {
    let qb = QueryBuilder::new();
    let data = row! { "username" => "u", "email" => "e" };
    let stmt = qb
        .compile_insert(&mysql(), "users", &[data], InsertMode::Insert)
        .unwrap();
    assert_eq!(stmt.sql, "INSERT INTO users (username, email) VALUES (?, ?)");
    assert_eq!(stmt.params, vec![Value::from("u"), Value::from("e")]);
}

#[test]
fn test_insert_postgres_returns_id() {
    let qb = QueryBuilder::new();
    let data = row! { "username" => "u" };
    let stmt = qb
        .compile_insert(&pg(), "users", &[data], InsertMode::Insert)
        .unwrap();
    assert_eq!(stmt.sql, "INSERT INTO users (username) VALUES ($1) RETURNING *");
    assert!(stmt.returns_rows());
}

#[test]
fn test_insert_markers() {
    let qb = QueryBuilder::new();
    let data = row! {
        "password" => func("SHA2(?, ?)", vec!["secret".into(), 256.into()]),
        "created_at" => now(None),
        "expires_at" => now(Some("+1 day")),
        "name" => "n",
    };
    let stmt = qb
        .compile_insert(&mysql(), "users", &[data], InsertMode::Insert)
        .unwrap();
    assert_eq!(
        stmt.sql,
        "INSERT INTO users (password, created_at, expires_at, name) \
         VALUES (SHA2(?, ?), NOW(), NOW() + INTERVAL 1 DAY, ?)"
    );
    assert_eq!(
        stmt.params,
        vec![Value::from("secret"), Value::Int(256), Value::from("n")]
    );

    let data = row! { "logins" => inc(1) };
    assert!(
        qb.compile_insert(&mysql(), "users", &[data], InsertMode::Insert)
            .is_err()
    );
}

#[test]
fn test_batch_insert_emits_rows_in_order() {
    let qb = QueryBuilder::new();
    let rows = vec![
        row! { "a" => 1, "b" => "x" },
        // same set, different order
        row! { "b" => "y", "a" => 2 },
    ];
    let stmt = qb
        .compile_insert(&pg(), "t", &rows, InsertMode::Insert)
        .unwrap();
    assert_eq!(stmt.sql, "INSERT INTO t (a, b) VALUES ($1, $2), ($3, $4)");
    assert_eq!(
        stmt.params,
        vec![Value::Int(1), Value::from("x"), Value::Int(2), Value::from("y")]
    );
}

#[test]
fn test_batch_insert_schema_mismatch() {
    let qb = QueryBuilder::new();
    let rows = vec![row! { "a" => 1, "b" => 2 }, row! { "a" => 3, "c" => 4 }];
    let err = qb
        .compile_insert(&mysql(), "t", &rows, InsertMode::Insert)
        .unwrap_err();
    assert_eq!(
        err,
        BuilderError::SchemaMismatch {
            row: 1,
            expected: vec!["a".into(), "b".into()],
            found: vec!["a".into(), "c".into()],
        }
    );

    let rows = vec![row! { "a" => 1 }, row! { "a" => 3, "b" => 4 }];
    assert!(matches!(
        qb.compile_insert(&mysql(), "t", &rows, InsertMode::Insert),
        Err(BuilderError::SchemaMismatch { row: 1, .. })
    ));
}

#[test]
fn test_insert_requires_data() {
    let qb = QueryBuilder::new();
    assert_eq!(
        qb.compile_insert(&mysql(), "t", &[], InsertMode::Insert)
            .unwrap_err(),
        BuilderError::EmptyData { statement: "INSERT" }
    );
    assert!(
        qb.compile_insert(&mysql(), "t", &[RowData::new()], InsertMode::Insert)
            .is_err()
    );
}

#[test]
fn test_upsert_single_row_rebinds_values() {
    let mut qb = QueryBuilder::new();
    qb.on_duplicate(&["email", "name"]).on_duplicate_insert_id("id");
    let data = row! { "username" => "u", "email" => "e", "name" => "n" };
    let stmt = qb
        .compile_insert(&mysql(), "users", &[data.clone()], InsertMode::Insert)
        .unwrap();
    assert_eq!(
        stmt.sql,
        "INSERT INTO users (username, email, name) VALUES (?, ?, ?) \
         ON DUPLICATE KEY UPDATE id = LAST_INSERT_ID(id), email = ?, name = ?"
    );
    // the second copy follows the INSERT values
    assert_eq!(
        stmt.params,
        vec![
            Value::from("u"),
            Value::from("e"),
            Value::from("n"),
            Value::from("e"),
            Value::from("n"),
        ]
    );

    let mut qb = QueryBuilder::new();
    qb.on_duplicate(&["email"])
        .on_duplicate_set("hits", inc(1))
        .on_conflict_target(&["username"]);
    let stmt = qb
        .compile_insert(&pg(), "users", &[data], InsertMode::Insert)
        .unwrap();
    assert_eq!(
        stmt.sql,
        "INSERT INTO users (username, email, name) VALUES ($1, $2, $3) \
         ON CONFLICT (username) DO UPDATE SET email = $4, hits = users.hits + $5 RETURNING *"
    );
}

#[test]
fn test_upsert_increment_names_existing_row() {
    let data = row! { "k" => "a" };

    let mut qb = QueryBuilder::new();
    qb.on_duplicate_set("hits", inc(1)).on_conflict_target(&["k"]);
    let ctx = pg().with_prefix("app_");
    let stmt = qb
        .compile_insert(&ctx, "counters", &[data.clone()], InsertMode::Insert)
        .unwrap();
    assert_eq!(
        stmt.sql,
        "INSERT INTO app_counters (k) VALUES ($1) \
         ON CONFLICT (k) DO UPDATE SET hits = app_counters.hits + $2 RETURNING *"
    );
    assert_eq!(stmt.params, vec![Value::from("a"), Value::Int(1)]);

    let stmt = qb
        .compile_insert(&pg(), "stats.counters", &[data.clone()], InsertMode::Insert)
        .unwrap();
    assert!(stmt.sql.contains("SET hits = counters.hits + $2"));

    // MySQL resolves the bare column to the existing row
    let mut qb = QueryBuilder::new();
    qb.on_duplicate_set("hits", inc(1));
    let stmt = qb
        .compile_insert(&mysql(), "counters", &[data], InsertMode::Insert)
        .unwrap();
    assert_eq!(
        stmt.sql,
        "INSERT INTO counters (k) VALUES (?) ON DUPLICATE KEY UPDATE hits = hits + ?"
    );
}

#[test]
fn test_upsert_batch_references_inserted_row() {
    let rows = vec![row! { "k" => 1, "v" => "a" }, row! { "k" => 2, "v" => "b" }];

    let mut qb = QueryBuilder::new();
    qb.on_duplicate(&["v"]);
    let stmt = qb
        .compile_insert(&mysql(), "kv", &rows, InsertMode::Insert)
        .unwrap();
    assert_eq!(
        stmt.sql,
        "INSERT INTO kv (k, v) VALUES (?, ?), (?, ?) ON DUPLICATE KEY UPDATE v = VALUES(v)"
    );

    qb.on_conflict_target(&["k"]);
    let stmt = qb
        .compile_insert(&pg(), "kv", &rows, InsertMode::Insert)
        .unwrap();
    assert_eq!(
        stmt.sql,
        "INSERT INTO kv (k, v) VALUES ($1, $2), ($3, $4) ON CONFLICT (k) DO UPDATE SET v = EXCLUDED.v"
    );
}

#[test]
fn test_upsert_errors() {
    let data = row! { "k" => 1 };

    let mut qb = QueryBuilder::new();
    qb.on_duplicate(&["missing"]);
    assert!(
        qb.compile_insert(&mysql(), "kv", &[data.clone()], InsertMode::Insert)
            .is_err()
    );

    // Postgres needs a conflict target
    let mut qb = QueryBuilder::new();
    qb.on_duplicate(&["k"]);
    assert!(
        qb.compile_insert(&pg(), "kv", &[data.clone()], InsertMode::Insert)
            .is_err()
    );

    let mut qb = QueryBuilder::new();
    qb.on_conflict_target(&["k"]);
    let stmt = qb
        .compile_insert(&pg(), "kv", &[data], InsertMode::Insert)
        .unwrap();
    assert_eq!(
        stmt.sql,
        "INSERT INTO kv (k) VALUES ($1) ON CONFLICT (k) DO NOTHING RETURNING *"
    );
}

#[test]
fn test_replace_is_mysql_only() {
    let qb = QueryBuilder::new();
    let data = row! { "id" => 1, "name" => "n" };
    let stmt = qb
        .compile_insert(&mysql(), "t", &[data.clone()], InsertMode::Replace)
        .unwrap();
    assert_eq!(stmt.sql, "REPLACE INTO t (id, name) VALUES (?, ?)");
    assert!(
        qb.compile_insert(&pg(), "t", &[data], InsertMode::Replace)
            .is_err()
    );
}

// ── UPDATE / DELETE ──

#[test]
fn test_update_basic() {
    let mut qb = QueryBuilder::new();
    qb.where_("id", 1);
    let data = row! { "status" => "inactive", "logins" => inc(2) };
    let stmt = qb
        .compile_update(&pg(), "users", &data, Limit::All)
        .unwrap();
    assert_eq!(
        stmt.sql,
        "UPDATE users SET status = $1, logins = logins + $2 WHERE id = $3"
    );
    assert_eq!(
        stmt.params,
        vec![Value::from("inactive"), Value::Int(2), Value::Int(1)]
    );
}

#[test]
fn test_update_mysql_limit_and_join() {
    let mut qb = QueryBuilder::new();
    qb.join("teams t", "t.id = u.team_id", JoinKind::Inner)
        .where_("t.name", "core")
        .order_by("u.id", Order::Asc);
    let data = row! { "u.flag" => 1 };
    let stmt = qb
        .compile_update(&mysql(), "users u", &data, Limit::from(5))
        .unwrap();
    assert_eq!(
        stmt.sql,
        "UPDATE users u INNER JOIN teams t ON t.id = u.team_id SET u.flag = ? \
         WHERE t.name = ? ORDER BY u.id ASC LIMIT 5"
    );
    assert!(
        qb.compile_update(&pg(), "users u", &data, Limit::from(5))
            .is_err()
    );
}

#[test]
fn test_update_requires_where_or_opt_in() {
    let data = row! { "a" => 1 };
    let mut qb = QueryBuilder::new();
    assert_eq!(
        qb.compile_update(&mysql(), "t", &data, Limit::All)
            .unwrap_err(),
        BuilderError::MissingWhere { statement: "UPDATE" }
    );
    qb.allow_full_table();
    let stmt = qb.compile_update(&mysql(), "t", &data, Limit::All).unwrap();
    assert_eq!(stmt.sql, "UPDATE t SET a = ?");

    let qb = QueryBuilder::new();
    let ctx = mysql().allow_unfiltered(true);
    assert!(qb.compile_update(&ctx, "t", &data, Limit::All).is_ok());
    assert!(
        qb.compile_update(&mysql(), "t", &RowData::new(), Limit::All)
            .is_err()
    );
}

#[test]
fn test_delete() {
    let mut qb = QueryBuilder::new();
    qb.where_op("created_at", Op::Lt, "2020-01-01");
    let stmt = qb.compile_delete(&mysql(), "logs", Limit::from(100)).unwrap();
    assert_eq!(stmt.sql, "DELETE FROM logs WHERE created_at < ? LIMIT 100");

    let stmt = qb.compile_delete(&pg(), "logs", Limit::All).unwrap();
    assert_eq!(stmt.sql, "DELETE FROM logs WHERE created_at < $1");
    assert!(qb.compile_delete(&pg(), "logs", Limit::from(1)).is_err());
}

#[test]
fn test_delete_with_join_targets_alias() {
    let mut qb = QueryBuilder::new();
    qb.join("users u", "u.id = s.user_id", JoinKind::Inner)
        .where_("u.banned", true);
    let stmt = qb.compile_delete(&mysql(), "sessions s", Limit::All).unwrap();
    assert_eq!(
        stmt.sql,
        "DELETE s FROM sessions s INNER JOIN users u ON u.id = s.user_id WHERE u.banned = ?"
    );
}

#[test]
fn test_delete_without_where_is_refused() {
    let qb = QueryBuilder::new();
    assert_eq!(
        qb.compile_delete(&mysql(), "t", Limit::All).unwrap_err(),
        BuilderError::MissingWhere { statement: "DELETE" }
    );
}

#[test]
fn test_builder_is_empty_after_take() {
    let mut qb = QueryBuilder::new();
    qb.where_("a", 1)
        .join("b", "b.id = a.b_id", JoinKind::Left)
        .group_by("a.x")
        .order_by("a.y", Order::Desc)
        .limit(3);
    assert!(!qb.is_empty());
    let taken = std::mem::take(&mut qb);
    assert!(qb.is_empty());
    assert!(!taken.is_empty());
}

#[test]
fn test_placeholder_count_matches_params_across_shapes() {
    let mut qb = QueryBuilder::new();
    qb.join_params("x", "x.k = ? AND x.j = ?", vec![1.into(), 2.into()], JoinKind::Inner)
        .where_group(|g| {
            g.and_op("a", Op::Between, [1, 9])
                .or_op("b", Op::NotIn, vec![3, 4])
                .or_op("c", Op::IsNotNull, ())
        })
        .where_raw("d = ? OR e = '?'", vec![5.into()])
        .having_op("f", Op::Like, "%g%")
        .order_by_values("h", [7], Order::Desc);
    let stmt = qb.compile_select(&mysql(), "t", &[], Limit::from(1)).unwrap();
    // one literal '?' inside quotes
    assert_eq!(placeholders(&stmt.sql) - 1, stmt.params.len());
    assert_eq!(
        stmt.params,
        vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(1),
            Value::Int(9),
            Value::Int(3),
            Value::Int(4),
            Value::Int(5),
            Value::from("%g%"),
            Value::Int(7),
        ]
    );
}
