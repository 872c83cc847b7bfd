use super::{
    util::{decode_point, encode_point},
    ArchiveEntry, Completion, ConfigurationSnapshot, ConnectionError, WalkerKey, WalkerRecord,
    WalkerSummary,
};
use crate::{
    parameters::ParameterSpace,
    solver::{History, SolverState},
};
use parking_lot::{lock_api::ArcMutexGuard, FairMutex, RawFairMutex};
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
    Connection, OpenFlags, OptionalExtension, ToSql, TransactionBehavior,
};
use std::{path::Path, sync::Arc, time::Duration};
use tracing::{debug, error, info};
use tracing_unwrap::ResultExt;

const PARAMETERS_KEY: &str = "parameters";
const CONFIGURATION_KEY: &str = "configuration";

#[derive(Debug)]
/// Transparent, thread safe wrapper over `InnerConnection`
pub struct SharedConnection(Arc<FairMutex<InnerConnection>>);

#[derive(Debug)]
pub struct InnerConnection {
    connection: Connection,
}

impl From<rusqlite::Error> for ConnectionError {
    fn from(error: rusqlite::Error) -> Self {
        ConnectionError::SQLite(error)
    }
}

impl ToSql for Completion {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as i8))
    }
}

impl FromSql for Completion {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Completion::try_from(i64::column_result(value)?).map_err(FromSqlError::OutOfRange)
    }
}

impl SharedConnection {
    pub fn new(inner_connection: InnerConnection) -> Self {
        Self(Arc::new(FairMutex::new(inner_connection)))
    }

    fn lock(&self) -> ArcMutexGuard<RawFairMutex, InnerConnection> {
        self.0.lock_arc()
    }

    pub fn load(path: &Path, busy_timeout: Duration) -> Result<Self, ConnectionError> {
        let mut inner = InnerConnection::load(path, busy_timeout)?;
        inner.init()?;

        Ok(Self::new(inner))
    }

    pub fn load_read_only(path: &Path) -> Result<Self, ConnectionError> {
        Ok(Self::new(InnerConnection::load_read_only(path)?))
    }

    pub fn close(self) -> Result<(), ConnectionError> {
        Arc::try_unwrap(self.0).unwrap_or_log().into_inner().close()
    }

    pub fn load_entry(&self, key: &WalkerKey) -> Result<Option<ArchiveEntry>, ConnectionError> {
        self.lock().load_entry(key)
    }

    pub fn save(
        &self,
        key: &WalkerKey,
        entry: ArchiveEntry,
    ) -> Result<WalkerSummary, ConnectionError> {
        self.lock().save(key, entry)
    }

    pub fn load_configuration(&self) -> Result<Option<ConfigurationSnapshot>, ConnectionError> {
        self.lock().load_configuration()
    }

    pub fn save_configuration(
        &self,
        snapshot: &ConfigurationSnapshot,
    ) -> Result<(), ConnectionError> {
        self.lock().save_configuration(snapshot)
    }

    pub fn keys(&self) -> Result<Vec<WalkerKey>, ConnectionError> {
        self.lock().keys()
    }

    pub fn points(&self) -> Result<Vec<Vec<f64>>, ConnectionError> {
        self.lock().points()
    }

    pub fn arrive(&self, barrier: &str, rank: usize) -> Result<(), ConnectionError> {
        self.lock().arrive(barrier, rank)
    }

    pub fn reset_barrier(&self, barrier: &str) -> Result<(), ConnectionError> {
        self.lock().reset_barrier(barrier)
    }

    pub fn arrivals(&self, barrier: &str) -> Result<usize, ConnectionError> {
        self.lock().arrivals(barrier)
    }
}

impl InnerConnection {
    pub fn load(path: &Path, busy_timeout: Duration) -> Result<Self, ConnectionError> {
        let connection = Connection::open(path)?;
        // concurrent ranks wait on each other's write transactions instead of failing
        connection.busy_timeout(busy_timeout)?;

        debug!(path = ?path, "Opened SQLite archive");

        Ok(Self { connection })
    }

    pub fn load_read_only(path: &Path) -> Result<Self, ConnectionError> {
        let connection = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

        debug!(path = ?path, "Opened SQLite archive read only");

        Ok(Self { connection })
    }

    pub fn init(&mut self) -> Result<(), ConnectionError> {
        let mut counter = 1;

        for table in SQL_SCHEMA {
            match self.connection.execute(table, []) {
                Ok(_) => debug!("Applied SQL schema ({counter}/{SQL_SCHEMA_NUMBER})"),
                Err(error) => {
                    error!(error = ?error, table = table, "Failed to apply SQL schema ({counter}/{SQL_SCHEMA_NUMBER}): {error}");

                    return Err(ConnectionError::SQLite(error));
                }
            };

            counter += 1;
        }

        Ok(())
    }

    pub fn close(mut self) -> Result<(), ConnectionError> {
        let mut counter = 0;
        while let Err((connection, error)) = self.connection.close() {
            counter += 1;
            self.connection = connection;
            error!(error = ?error, "Failed to close SQLite connection: {error}, trying again {counter}/3");

            if counter == 3 {
                error!("Failed to close connection, giving up");

                return Err(ConnectionError::SQLite(error));
            }
        }

        info!("Closed SQLite connection");

        Ok(())
    }

    fn has_table(&self, name: &str) -> Result<bool, ConnectionError> {
        let count: i64 = self
            .connection
            .prepare_cached("select count(*) from sqlite_master where type = 'table' and name = ?")?
            .query_row(params![name], |row| row.get(0))?;

        Ok(count > 0)
    }

    pub fn load_entry(
        &mut self,
        key: &WalkerKey,
    ) -> Result<Option<ArchiveEntry>, ConnectionError> {
        // one read transaction keeps record, history and state consistent with each other
        let tx = self.connection.transaction()?;

        let summary = match load_summary(&tx, key)? {
            Some(summary) => summary,
            None => return Ok(None),
        };

        let rows = tx
            .prepare_cached("select point, value from evaluations where walker = ? order by id")?
            .query_map(params![key.to_string()], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut history = History::default();
        for (point, value) in rows {
            history.push(decode_point(&point)?, value);
        }

        let state: Option<SolverState> = tx
            .prepare_cached("select state from states where walker = ?")?
            .query_row(params![key.to_string()], |row| row.get::<_, Option<String>>(0))
            .optional()?
            .flatten()
            .map(|state| serde_yaml::from_str(&state))
            .transpose()?;

        tx.commit()?;

        Ok(Some(ArchiveEntry {
            record: WalkerRecord { history, summary },
            state,
        }))
    }

    pub fn save(
        &mut self,
        key: &WalkerKey,
        entry: ArchiveEntry,
    ) -> Result<WalkerSummary, ConnectionError> {
        let ArchiveEntry { record, state } = entry;
        let state = state.map(|state| serde_yaml::to_string(&state)).transpose()?;
        let name = key.to_string();

        // take the write lock up front, the merge reads and writes the same row
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let summary = match load_summary(&tx, key)? {
            Some(mut existing) => {
                existing.merge(&record.summary);
                existing
            }
            None => record.summary,
        };

        tx.prepare_cached(
            "insert into walkers
             (key, rank, walker, tag, best_point, best_value, completion, elapsed,
              generations, evaluations)
             values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             on conflict (key) do update set
              best_point = excluded.best_point,
              best_value = excluded.best_value,
              completion = excluded.completion,
              elapsed = excluded.elapsed,
              generations = excluded.generations,
              evaluations = excluded.evaluations",
        )?
        .execute(params![
            name,
            key.rank as i64,
            key.index as i64,
            key.tag,
            summary
                .best_value
                .map(|_| encode_point(&summary.best_point)),
            summary.best_value,
            summary.completion,
            summary.elapsed,
            summary.generations as i64,
            summary.evaluations as i64
        ])?;

        {
            let mut insert = tx.prepare_cached(
                "insert into evaluations (walker, point, value) values (?, ?, ?)",
            )?;

            for (point, value) in record
                .history
                .points
                .iter()
                .zip(record.history.values.iter())
            {
                insert.execute(params![name, encode_point(point), value])?;
            }
        }

        tx.prepare_cached("insert or replace into states (walker, state) values (?, ?)")?
            .execute(params![name, state])?;

        tx.commit()?;

        debug!(
            key = %key,
            appended = record.history.len(),
            "Saved walker record"
        );

        Ok(summary)
    }

    pub fn load_configuration(&self) -> Result<Option<ConfigurationSnapshot>, ConnectionError> {
        if !self.has_table("configuration")? {
            return Ok(None);
        }

        read_configuration(&self.connection)
    }

    pub fn save_configuration(
        &mut self,
        snapshot: &ConfigurationSnapshot,
    ) -> Result<(), ConnectionError> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        match read_configuration(&tx)? {
            Some(stored) => stored.validate(&snapshot.parameters)?,
            None => {
                let parameters = serde_yaml::to_string(&snapshot.parameters)?;
                let mut insert =
                    tx.prepare_cached("insert into configuration (key, value) values (?, ?)")?;

                insert.execute(params![PARAMETERS_KEY, parameters])?;
                insert.execute(params![CONFIGURATION_KEY, snapshot.configuration])?;
                drop(insert);

                info!("Stored configuration in archive");
            }
        }

        tx.commit()?;

        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<WalkerKey>, ConnectionError> {
        Ok(self
            .connection
            .prepare_cached("select rank, walker, tag from walkers order by rank, walker, tag")?
            .query_map([], |row| {
                Ok(WalkerKey::new(
                    row.get::<_, i64>(0)? as usize,
                    row.get::<_, i64>(1)? as usize,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub fn points(&self) -> Result<Vec<Vec<f64>>, ConnectionError> {
        self.connection
            .prepare_cached("select point from evaluations order by id")?
            .query_map([], |row| row.get::<_, Vec<u8>>(0))?
            .map(|point| decode_point(&point?))
            .collect()
    }

    pub fn arrive(&self, barrier: &str, rank: usize) -> Result<(), ConnectionError> {
        self.connection
            .prepare_cached("insert or ignore into barriers (name, rank) values (?, ?)")?
            .execute(params![barrier, rank as i64])?;

        Ok(())
    }

    pub fn reset_barrier(&self, barrier: &str) -> Result<(), ConnectionError> {
        self.connection
            .prepare_cached("delete from barriers where name = ?")?
            .execute(params![barrier])?;

        Ok(())
    }

    pub fn arrivals(&self, barrier: &str) -> Result<usize, ConnectionError> {
        let count: i64 = self
            .connection
            .prepare_cached("select count(*) from barriers where name = ?")?
            .query_row(params![barrier], |row| row.get(0))?;

        Ok(count as usize)
    }
}

fn load_summary(
    connection: &Connection,
    key: &WalkerKey,
) -> Result<Option<WalkerSummary>, ConnectionError> {
    let row = connection
        .prepare_cached(
            "select best_point, best_value, completion, elapsed, generations, evaluations
             from walkers where key = ?",
        )?
        .query_row(params![key.to_string()], |row| {
            Ok((
                row.get::<_, Option<Vec<u8>>>(0)?,
                row.get::<_, Option<f64>>(1)?,
                row.get::<_, Completion>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })
        .optional()?;

    row.map(
        |(best_point, best_value, completion, elapsed, generations, evaluations)| {
            Ok(WalkerSummary {
                best_point: best_point
                    .map(|point| decode_point(&point))
                    .transpose()?
                    .unwrap_or_default(),
                best_value,
                completion,
                elapsed,
                generations: generations as u64,
                evaluations: evaluations as u64,
            })
        },
    )
    .transpose()
}

fn read_configuration(
    connection: &Connection,
) -> Result<Option<ConfigurationSnapshot>, ConnectionError> {
    let mut select = connection.prepare_cached("select value from configuration where key = ?")?;

    let parameters = select
        .query_row(params![PARAMETERS_KEY], |row| row.get::<_, String>(0))
        .optional()?;
    let configuration = select
        .query_row(params![CONFIGURATION_KEY], |row| row.get::<_, String>(0))
        .optional()?;

    match parameters {
        Some(parameters) => Ok(Some(ConfigurationSnapshot {
            parameters: serde_yaml::from_str::<ParameterSpace>(&parameters)?,
            configuration: configuration.unwrap_or_default(),
        })),
        None => Ok(None),
    }
}

pub const SQL_SCHEMA: [&str; 6] = [
    "create table if not exists configuration (
    key text primary key,
    value text not null
);",
    "create table if not exists walkers (
    key text primary key,
    rank integer not null,
    walker integer not null,
    tag text not null,

    best_point blob,
    best_value real,
    completion tinyint not null,
    elapsed real,
    generations integer not null,
    evaluations integer not null
);",
    "create table if not exists evaluations (
    id integer primary key,
    walker text not null references walkers (key),
    point blob not null,
    value real not null
);",
    "create index if not exists evaluations_by_walker on evaluations (walker, id);",
    "create table if not exists states (
    walker text primary key references walkers (key),
    state text
);",
    "create table if not exists barriers (
    name text not null,
    rank integer not null,
    primary key (name, rank)
);",
];
pub const SQL_SCHEMA_NUMBER: usize = SQL_SCHEMA.len();
