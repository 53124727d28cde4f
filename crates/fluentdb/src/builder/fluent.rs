//! Clause-declaring methods shared by every builder front-end.

/// Generate the fluent clause-declaring methods for a type that has
/// `fn state_mut(&mut self) -> &mut QueryBuilder`.
///
/// Shared by [`QueryBuilder`], [`SubQueryBuilder`] and [`Database`](crate::Database).
macro_rules! impl_fluent_methods {
    () => {
        // ── WHERE ──

        /// `AND column = value`
        pub fn where_(
            &mut self,
            column: impl Into<String>,
            value: impl Into<$crate::condition::Operand>,
        ) -> &mut Self {
            self.state_mut().wheres.push_leaf(
                $crate::condition::Connector::And,
                column,
                $crate::condition::Op::Eq,
                value,
            );
            self
        }

        /// `AND column <op> value`
        pub fn where_op(
            &mut self,
            column: impl Into<String>,
            op: $crate::condition::Op,
            value: impl Into<$crate::condition::Operand>,
        ) -> &mut Self {
            self.state_mut()
                .wheres
                .push_leaf($crate::condition::Connector::And, column, op, value);
            self
        }

        /// `OR column = value`
        pub fn or_where(
            &mut self,
            column: impl Into<String>,
            value: impl Into<$crate::condition::Operand>,
        ) -> &mut Self {
            self.state_mut().wheres.push_leaf(
                $crate::condition::Connector::Or,
                column,
                $crate::condition::Op::Eq,
                value,
            );
            self
        }

        /// `OR column <op> value`
        pub fn or_where_op(
            &mut self,
            column: impl Into<String>,
            op: $crate::condition::Op,
            value: impl Into<$crate::condition::Operand>,
        ) -> &mut Self {
            self.state_mut()
                .wheres
                .push_leaf($crate::condition::Connector::Or, column, op, value);
            self
        }

        /// `AND <sql>` with `?` placeholders bound to `params`.
        pub fn where_raw(
            &mut self,
            sql: impl Into<String>,
            params: Vec<$crate::value::Value>,
        ) -> &mut Self {
            self.state_mut()
                .wheres
                .push_raw($crate::condition::Connector::And, sql, params);
            self
        }

        pub fn or_where_raw(
            &mut self,
            sql: impl Into<String>,
            params: Vec<$crate::value::Value>,
        ) -> &mut Self {
            self.state_mut()
                .wheres
                .push_raw($crate::condition::Connector::Or, sql, params);
            self
        }

        /// `AND ( ... )`
        pub fn where_group(
            &mut self,
            f: impl FnOnce($crate::condition::ConditionList) -> $crate::condition::ConditionList,
        ) -> &mut Self {
            let group = f($crate::condition::ConditionList::new());
            self.state_mut()
                .wheres
                .push_group($crate::condition::Connector::And, group);
            self
        }

        /// `OR ( ... )`
        pub fn or_where_group(
            &mut self,
            f: impl FnOnce($crate::condition::ConditionList) -> $crate::condition::ConditionList,
        ) -> &mut Self {
            let group = f($crate::condition::ConditionList::new());
            self.state_mut()
                .wheres
                .push_group($crate::condition::Connector::Or, group);
            self
        }

        /// `AND EXISTS (sub-query)`
        pub fn where_exists(&mut self, sub: $crate::builder::SubQuery) -> &mut Self {
            self.state_mut().wheres.push_leaf(
                $crate::condition::Connector::And,
                "",
                $crate::condition::Op::Exists,
                sub,
            );
            self
        }

        // ── HAVING ──

        pub fn having(
            &mut self,
            column: impl Into<String>,
            value: impl Into<$crate::condition::Operand>,
        ) -> &mut Self {
            self.state_mut().having.push_leaf(
                $crate::condition::Connector::And,
                column,
                $crate::condition::Op::Eq,
                value,
            );
            self
        }

        pub fn having_op(
            &mut self,
            column: impl Into<String>,
            op: $crate::condition::Op,
            value: impl Into<$crate::condition::Operand>,
        ) -> &mut Self {
            self.state_mut()
                .having
                .push_leaf($crate::condition::Connector::And, column, op, value);
            self
        }

        pub fn or_having(
            &mut self,
            column: impl Into<String>,
            value: impl Into<$crate::condition::Operand>,
        ) -> &mut Self {
            self.state_mut().having.push_leaf(
                $crate::condition::Connector::Or,
                column,
                $crate::condition::Op::Eq,
                value,
            );
            self
        }

        pub fn or_having_op(
            &mut self,
            column: impl Into<String>,
            op: $crate::condition::Op,
            value: impl Into<$crate::condition::Operand>,
        ) -> &mut Self {
            self.state_mut()
                .having
                .push_leaf($crate::condition::Connector::Or, column, op, value);
            self
        }

        pub fn having_raw(
            &mut self,
            sql: impl Into<String>,
            params: Vec<$crate::value::Value>,
        ) -> &mut Self {
            self.state_mut()
                .having
                .push_raw($crate::condition::Connector::And, sql, params);
            self
        }

        // ── JOIN ──

        /// `<kind> JOIN target ON on`
        pub fn join(
            &mut self,
            target: impl Into<$crate::builder::JoinTarget>,
            on: &str,
            kind: $crate::builder::JoinKind,
        ) -> &mut Self {
            self.join_params(target, on, Vec::new(), kind)
        }

        /// JOIN whose ON condition has `?` placeholders bound to `params`.
        pub fn join_params(
            &mut self,
            target: impl Into<$crate::builder::JoinTarget>,
            on: &str,
            params: Vec<$crate::value::Value>,
            kind: $crate::builder::JoinKind,
        ) -> &mut Self {
            self.state_mut().joins.push($crate::builder::JoinSpec {
                target: target.into(),
                kind,
                on: on.to_string(),
                on_params: params,
                extra: $crate::condition::ConditionList::new(),
            });
            self
        }

        /// Add `AND column <op> value` to the ON clause of the join on `table`.
        pub fn join_where(
            &mut self,
            table: &str,
            column: impl Into<String>,
            op: $crate::condition::Op,
            value: impl Into<$crate::condition::Operand>,
        ) -> &mut Self {
            self.state_mut().add_join_condition(
                $crate::condition::Connector::And,
                table,
                column.into(),
                op,
                value.into(),
            );
            self
        }

        /// Add `OR column <op> value` to the ON clause of the join on `table`.
        pub fn join_or_where(
            &mut self,
            table: &str,
            column: impl Into<String>,
            op: $crate::condition::Op,
            value: impl Into<$crate::condition::Operand>,
        ) -> &mut Self {
            self.state_mut().add_join_condition(
                $crate::condition::Connector::Or,
                table,
                column.into(),
                op,
                value.into(),
            );
            self
        }

        // ── GROUP BY / ORDER BY / LIMIT ──

        pub fn group_by(&mut self, expr: impl Into<String>) -> &mut Self {
            self.state_mut().group_by.push(expr.into());
            self
        }

        pub fn order_by(&mut self, expr: impl Into<String>, direction: $crate::builder::Order) -> &mut Self {
            self.state_mut().order_by.push($crate::builder::OrderSpec {
                expr: expr.into(),
                direction,
                values: Vec::new(),
            });
            self
        }

        /// Order rows by the position of `column`'s value in `values`.
        pub fn order_by_values<T: Into<$crate::value::Value>>(
            &mut self,
            column: impl Into<String>,
            values: impl IntoIterator<Item = T>,
            direction: $crate::builder::Order,
        ) -> &mut Self {
            let values: Vec<$crate::value::Value> = values.into_iter().map(Into::into).collect();
            if values.is_empty() {
                self.state_mut().fail($crate::error::BuilderError::invalid(
                    "order_by_values requires at least one value",
                ));
                return self;
            }
            self.state_mut().order_by.push($crate::builder::OrderSpec {
                expr: column.into(),
                direction,
                values,
            });
            self
        }

        /// LIMIT for the next statement; a limit passed to the terminal call wins.
        pub fn limit(&mut self, limit: impl Into<$crate::builder::Limit>) -> &mut Self {
            self.state_mut().limit = limit.into();
            self
        }

        // ── Options ──

        /// Add a statement option such as `"SQL_NO_CACHE"`, `"DISTINCT"`, `"IGNORE"`,
        /// `"FOR UPDATE"` or `"SQL_CALC_FOUND_ROWS"`. Unknown options fail the next
        /// terminal call with `InvalidArgument`.
        pub fn set_query_option(&mut self, option: &str) -> &mut Self {
            self.state_mut().apply_query_option(option);
            self
        }

        pub fn set_query_options(&mut self, options: &[&str]) -> &mut Self {
            for option in options {
                self.state_mut().apply_query_option(option);
            }
            self
        }

        pub fn for_update(&mut self) -> &mut Self {
            self.state_mut().lock = Some($crate::builder::Lock::ForUpdate);
            self
        }

        pub fn lock_in_share_mode(&mut self) -> &mut Self {
            self.state_mut().lock = Some($crate::builder::Lock::Shared);
            self
        }

        /// Also compute the row count the next SELECT would return without its LIMIT.
        pub fn with_total_count(&mut self) -> &mut Self {
            self.state_mut().with_total_count = true;
            self
        }

        // ── Upsert ──

        /// On a duplicate key, update `columns` with the values being inserted.
        pub fn on_duplicate(&mut self, columns: &[&str]) -> &mut Self {
            self.state_mut().set_upsert_columns(columns);
            self
        }

        /// On a duplicate key, set `column` to `value`.
        pub fn on_duplicate_set(
            &mut self,
            column: impl Into<String>,
            value: impl Into<$crate::value::ColumnValue>,
        ) -> &mut Self {
            self.state_mut().set_upsert_value(column.into(), value.into());
            self
        }

        /// Report `column` of the updated row as the insert id when an upsert updates.
        pub fn on_duplicate_insert_id(&mut self, column: impl Into<String>) -> &mut Self {
            self.state_mut().set_upsert_insert_id(column.into());
            self
        }

        /// Conflict target for Postgres upserts (`ON CONFLICT (columns)`).
        pub fn on_conflict_target(&mut self, columns: &[&str]) -> &mut Self {
            self.state_mut().set_conflict_target(columns);
            self
        }

        // ── Safety ──

        /// Allow the next UPDATE/DELETE to run without a WHERE clause.
        pub fn allow_full_table(&mut self) -> &mut Self {
            self.state_mut().allow_full_table = true;
            self
        }
    };
}

pub(crate) use impl_fluent_methods;
