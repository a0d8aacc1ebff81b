//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Accounts (key: account_id)
//! - `offerings` - Offerings (key: offering_id)
//! - `windows` - Availability windows (key: window_id)
//! - `slots` - Time slots (key: slot_id)
//! - `reservations` - Reservations (key: reservation_id)
//! - `indices` - Secondary indices, one leading tag byte per index
//! - `platform_income` - Platform ledger (key: entry_id, UUIDv7)
//! - `provider_income` - Provider ledger (key: provider_id || entry_id)
//! - `subscriptions` - Subscriptions (key: subscription_id)
//! - `settings` - Singletons (deduction policy)
//! - `outbox` - Pending effects (key: next_attempt || entry_id)
//! - `dead_letters` - Exhausted effects (key: entry_id)
//!
//! Every mutating method commits exactly one `WriteBatch`. Mutations are
//! only called from the store actor, so check-then-write sequences are
//! race free; reads may happen from any thread.

use crate::{
    error::{Error, Result},
    types::{
        Account, AccountId, AvailabilityWindow, DeductionPolicy, Effect, Offering, OfferingId,
        OutboxEntry, PlatformLedgerEntry, ProviderLedgerEntry, Reservation, ReservationId,
        SettlementPlan, Subscription, TimeSlot, TrainingType, Weekday,
    },
    Config,
};
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_OFFERINGS: &str = "offerings";
const CF_WINDOWS: &str = "windows";
const CF_SLOTS: &str = "slots";
const CF_RESERVATIONS: &str = "reservations";
const CF_INDICES: &str = "indices";
const CF_PLATFORM_INCOME: &str = "platform_income";
const CF_PROVIDER_INCOME: &str = "provider_income";
const CF_SUBSCRIPTIONS: &str = "subscriptions";
const CF_SETTINGS: &str = "settings";
const CF_OUTBOX: &str = "outbox";
const CF_DEAD_LETTERS: &str = "dead_letters";

const ALL_CFS: [&str; 12] = [
    CF_ACCOUNTS,
    CF_OFFERINGS,
    CF_WINDOWS,
    CF_SLOTS,
    CF_RESERVATIONS,
    CF_INDICES,
    CF_PLATFORM_INCOME,
    CF_PROVIDER_INCOME,
    CF_SUBSCRIPTIONS,
    CF_SETTINGS,
    CF_OUTBOX,
    CF_DEAD_LETTERS,
];

const KEY_DEDUCTION_POLICY: &[u8] = b"deduction_policy";

/// Index tags (first byte of every key in `indices`)
mod tag {
    /// provider || offering -> ()
    pub const OFFERING_BY_PROVIDER: u8 = b'O';
    /// provider || training type -> offering
    pub const OFFERING_BY_TYPE: u8 = b'T';
    /// offering || window -> ()
    pub const WINDOW_BY_OFFERING: u8 = b'W';
    /// offering || day -> window
    pub const WINDOW_BY_DAY: u8 = b'D';
    /// window || slot -> ()
    pub const SLOT_BY_WINDOW: u8 = b'S';
    /// offering || start -> reservation
    pub const SLOT_CLAIM: u8 = b'C';
    /// channel name -> reservation
    pub const CHANNEL: u8 = b'H';
    /// provider || consumer || reservation -> ()
    pub const PAIR: u8 = b'P';
    /// provider || reservation -> ()
    pub const BY_PROVIDER: u8 = b'Q';
    /// consumer || reservation -> ()
    pub const BY_CONSUMER: u8 = b'U';
    /// start || reservation -> ()
    pub const BY_START: u8 = b'K';
    /// payment intent -> subscription
    pub const PAYMENT_INTENT: u8 = b'I';
    /// account || subscription -> ()
    pub const SUBSCRIPTION_BY_ACCOUNT: u8 = b'A';
    /// reservation -> platform entry
    pub const SETTLED: u8 = b'L';
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.db.path()).finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name)))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            "Opened RocksDB at {:?} with {} column families",
            path,
            ALL_CFS.len()
        );

        Ok(Self { db: Arc::new(db) })
    }

    fn cf_options(name: &str) -> Options {
        let mut opts = Options::default();
        match name {
            CF_INDICES => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                let mut block_opts = rocksdb::BlockBasedOptions::default();
                block_opts.set_bloom_filter(10.0, false);
                opts.set_block_based_table_factory(&block_opts);
            }
            CF_PLATFORM_INCOME | CF_PROVIDER_INCOME | CF_DEAD_LETTERS => {
                opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
            }
            _ => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            }
        }
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Generic helpers

    fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf)?;
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let cf = self.cf_handle(cf)?;
        batch.put_cf(cf, key, bincode::serialize(value)?);
        Ok(())
    }

    fn delete(&self, batch: &mut WriteBatch, cf: &str, key: &[u8]) -> Result<()> {
        let cf = self.cf_handle(cf)?;
        batch.delete_cf(cf, key);
        Ok(())
    }

    fn index(&self, batch: &mut WriteBatch, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf_handle(CF_INDICES)?;
        batch.put_cf(cf, key, value);
        Ok(())
    }

    fn unindex(&self, batch: &mut WriteBatch, key: &[u8]) -> Result<()> {
        self.delete(batch, CF_INDICES, key)
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<Uuid>> {
        let cf = self.cf_handle(CF_INDICES)?;
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(Some(decode_uuid(&value)?)),
            None => Ok(None),
        }
    }

    /// All (key, value) pairs of `cf` whose key starts with `prefix`
    fn scan(&self, cf: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf_handle(cf)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key, value));
        }
        Ok(out)
    }

    fn scan_values<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        self.scan(cf, prefix)?
            .iter()
            .map(|(_, value)| bincode::deserialize(value).map_err(Error::from))
            .collect()
    }

    /// IDs stored as the trailing 16 bytes of index keys under `prefix`
    fn index_ids(&self, prefix: &[u8]) -> Result<Vec<Uuid>> {
        self.scan(CF_INDICES, prefix)?
            .iter()
            .map(|(key, _)| uuid_suffix(key))
            .collect()
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db.write(batch)?;
        Ok(())
    }

    // Accounts

    /// Get account by ID
    pub fn find_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.get(CF_ACCOUNTS, id.as_bytes())
    }

    /// Get account by ID, `NotFound` if missing
    pub fn get_account(&self, id: AccountId) -> Result<Account> {
        self.find_account(id)?
            .ok_or_else(|| Error::not_found("Account", id))
    }

    /// Insert or replace an account
    pub fn put_account(&self, account: &Account) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_ACCOUNTS, account.id.as_bytes(), account)?;
        self.write(batch)
    }

    // Offerings

    /// Get offering by ID
    pub fn find_offering(&self, id: OfferingId) -> Result<Option<Offering>> {
        self.get(CF_OFFERINGS, id.as_bytes())
    }

    /// Get offering by ID, `NotFound` if missing
    pub fn get_offering(&self, id: OfferingId) -> Result<Offering> {
        self.find_offering(id)?
            .ok_or_else(|| Error::not_found("Offering", id))
    }

    /// All offerings of a provider
    pub fn offerings_by_provider(&self, provider: AccountId) -> Result<Vec<Offering>> {
        let prefix = index_key(tag::OFFERING_BY_PROVIDER, &[provider.as_bytes()]);
        self.index_ids(&prefix)?
            .into_iter()
            .map(|id| self.get_offering(id))
            .collect()
    }

    /// Offering of `provider` with the given type, if any
    pub fn offering_by_type(
        &self,
        provider: AccountId,
        training_type: TrainingType,
    ) -> Result<Option<OfferingId>> {
        self.lookup(&index_key(
            tag::OFFERING_BY_TYPE,
            &[provider.as_bytes(), &[training_type as u8]],
        ))
    }

    /// Insert a new offering with its indices
    pub fn insert_offering(&self, offering: &Offering) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_OFFERINGS, offering.id.as_bytes(), offering)?;
        self.index(
            &mut batch,
            &index_key(
                tag::OFFERING_BY_PROVIDER,
                &[offering.provider_id.as_bytes(), offering.id.as_bytes()],
            ),
            &[],
        )?;
        self.index(
            &mut batch,
            &index_key(
                tag::OFFERING_BY_TYPE,
                &[offering.provider_id.as_bytes(), &[offering.training_type as u8]],
            ),
            offering.id.as_bytes(),
        )?;
        self.write(batch)
    }

    /// Replace an offering record (indexed fields must not change)
    pub fn update_offering(&self, offering: &Offering) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_OFFERINGS, offering.id.as_bytes(), offering)?;
        self.write(batch)
    }

    /// Delete an offering with its windows and slots; reservations keep
    /// their history with the offering reference cleared
    pub fn delete_offering(&self, offering: &Offering) -> Result<usize> {
        let mut batch = WriteBatch::default();

        for window in self.windows_for_offering(offering.id)? {
            for slot in self.slots_for_window(window.id)? {
                self.stage_slot_removal(&mut batch, &slot)?;
            }
            self.stage_window_removal(&mut batch, &window)?;
        }

        let claim_prefix = index_key(tag::SLOT_CLAIM, &[offering.id.as_bytes()]);
        let mut detached = 0;
        for (key, value) in self.scan(CF_INDICES, &claim_prefix)? {
            let reservation_id = decode_uuid(&value)?;
            if let Some(mut reservation) = self.find_reservation(reservation_id)? {
                reservation.offering_id = None;
                self.put(
                    &mut batch,
                    CF_RESERVATIONS,
                    reservation.id.as_bytes(),
                    &reservation,
                )?;
                detached += 1;
            }
            self.unindex(&mut batch, &key)?;
        }

        self.delete(&mut batch, CF_OFFERINGS, offering.id.as_bytes())?;
        self.unindex(
            &mut batch,
            &index_key(
                tag::OFFERING_BY_PROVIDER,
                &[offering.provider_id.as_bytes(), offering.id.as_bytes()],
            ),
        )?;
        self.unindex(
            &mut batch,
            &index_key(
                tag::OFFERING_BY_TYPE,
                &[offering.provider_id.as_bytes(), &[offering.training_type as u8]],
            ),
        )?;

        self.write(batch)?;
        Ok(detached)
    }

    // Availability

    /// Get window by ID
    pub fn find_window(&self, id: Uuid) -> Result<Option<AvailabilityWindow>> {
        self.get(CF_WINDOWS, id.as_bytes())
    }

    /// Get window by ID, `NotFound` if missing
    pub fn get_window(&self, id: Uuid) -> Result<AvailabilityWindow> {
        self.find_window(id)?
            .ok_or_else(|| Error::not_found("Availability window", id))
    }

    /// Windows of an offering
    pub fn windows_for_offering(&self, offering: OfferingId) -> Result<Vec<AvailabilityWindow>> {
        let prefix = index_key(tag::WINDOW_BY_OFFERING, &[offering.as_bytes()]);
        self.index_ids(&prefix)?
            .into_iter()
            .map(|id| self.get_window(id))
            .collect()
    }

    /// Window of an offering on a given day
    pub fn window_for_day(
        &self,
        offering: OfferingId,
        day: Weekday,
    ) -> Result<Option<AvailabilityWindow>> {
        match self.lookup(&index_key(
            tag::WINDOW_BY_DAY,
            &[offering.as_bytes(), &[day as u8]],
        ))? {
            Some(id) => self.find_window(id),
            None => Ok(None),
        }
    }

    /// Get slot by ID
    pub fn find_slot(&self, id: Uuid) -> Result<Option<TimeSlot>> {
        self.get(CF_SLOTS, id.as_bytes())
    }

    /// Slots of a window, ordered by start
    pub fn slots_for_window(&self, window: Uuid) -> Result<Vec<TimeSlot>> {
        let prefix = index_key(tag::SLOT_BY_WINDOW, &[window.as_bytes()]);
        let mut slots = self
            .index_ids(&prefix)?
            .into_iter()
            .filter_map(|id| self.find_slot(id).transpose())
            .collect::<Result<Vec<_>>>()?;
        slots.sort_by_key(|slot| slot.start);
        Ok(slots)
    }

    /// Every slot a provider has on `day`, across all offerings
    pub fn provider_slots_on(&self, provider: AccountId, day: Weekday) -> Result<Vec<TimeSlot>> {
        let mut slots = Vec::new();
        for offering in self.offerings_by_provider(provider)? {
            if let Some(window) = self.window_for_day(offering.id, day)? {
                slots.extend(self.slots_for_window(window.id)?);
            }
        }
        Ok(slots)
    }

    /// Insert a slot, creating its window in the same write when new
    pub fn insert_slot(
        &self,
        new_window: Option<&AvailabilityWindow>,
        slot: &TimeSlot,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        if let Some(window) = new_window {
            self.put(&mut batch, CF_WINDOWS, window.id.as_bytes(), window)?;
            self.index(
                &mut batch,
                &index_key(
                    tag::WINDOW_BY_OFFERING,
                    &[window.offering_id.as_bytes(), window.id.as_bytes()],
                ),
                &[],
            )?;
            self.index(
                &mut batch,
                &index_key(
                    tag::WINDOW_BY_DAY,
                    &[window.offering_id.as_bytes(), &[window.day as u8]],
                ),
                window.id.as_bytes(),
            )?;
        }

        self.put(&mut batch, CF_SLOTS, slot.id.as_bytes(), slot)?;
        self.index(
            &mut batch,
            &index_key(
                tag::SLOT_BY_WINDOW,
                &[slot.window_id.as_bytes(), slot.id.as_bytes()],
            ),
            &[],
        )?;

        self.write(batch)
    }

    /// Delete a slot, and its window too when `prune` is set
    pub fn delete_slot(&self, slot: &TimeSlot, prune: Option<&AvailabilityWindow>) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_slot_removal(&mut batch, slot)?;
        if let Some(window) = prune {
            self.stage_window_removal(&mut batch, window)?;
        }
        self.write(batch)
    }

    fn stage_slot_removal(&self, batch: &mut WriteBatch, slot: &TimeSlot) -> Result<()> {
        self.delete(batch, CF_SLOTS, slot.id.as_bytes())?;
        self.unindex(
            batch,
            &index_key(
                tag::SLOT_BY_WINDOW,
                &[slot.window_id.as_bytes(), slot.id.as_bytes()],
            ),
        )
    }

    fn stage_window_removal(
        &self,
        batch: &mut WriteBatch,
        window: &AvailabilityWindow,
    ) -> Result<()> {
        self.delete(batch, CF_WINDOWS, window.id.as_bytes())?;
        self.unindex(
            batch,
            &index_key(
                tag::WINDOW_BY_OFFERING,
                &[window.offering_id.as_bytes(), window.id.as_bytes()],
            ),
        )?;
        self.unindex(
            batch,
            &index_key(
                tag::WINDOW_BY_DAY,
                &[window.offering_id.as_bytes(), &[window.day as u8]],
            ),
        )
    }

    // Reservations

    /// Get reservation by ID
    pub fn find_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        self.get(CF_RESERVATIONS, id.as_bytes())
    }

    /// Get reservation by ID, `NotFound` if missing
    pub fn get_reservation(&self, id: ReservationId) -> Result<Reservation> {
        self.find_reservation(id)?
            .ok_or_else(|| Error::not_found("Reservation", id))
    }

    /// Reservation holding the (offering, start) claim
    pub fn slot_claim(
        &self,
        offering: OfferingId,
        start: DateTime<Utc>,
    ) -> Result<Option<ReservationId>> {
        self.lookup(&claim_key(offering, start))
    }

    /// Whether a channel name is in use
    pub fn channel_taken(&self, channel_name: &str) -> Result<bool> {
        Ok(self
            .lookup(&index_key(tag::CHANNEL, &[channel_name.as_bytes()]))?
            .is_some())
    }

    /// Paid reservations between a provider and consumer, excluding one
    pub fn count_prior_paid(
        &self,
        provider: AccountId,
        consumer: AccountId,
        exclude: ReservationId,
    ) -> Result<usize> {
        let prefix = index_key(tag::PAIR, &[provider.as_bytes(), consumer.as_bytes()]);
        let mut count = 0;
        for id in self.index_ids(&prefix)? {
            if id == exclude {
                continue;
            }
            if let Some(reservation) = self.find_reservation(id)? {
                if reservation.paid {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Reservations where `provider` is the provider
    pub fn reservations_by_provider(&self, provider: AccountId) -> Result<Vec<Reservation>> {
        self.reservations_under(&index_key(tag::BY_PROVIDER, &[provider.as_bytes()]))
    }

    /// Reservations where `consumer` is the consumer
    pub fn reservations_by_consumer(&self, consumer: AccountId) -> Result<Vec<Reservation>> {
        self.reservations_under(&index_key(tag::BY_CONSUMER, &[consumer.as_bytes()]))
    }

    /// Every reservation
    pub fn all_reservations(&self) -> Result<Vec<Reservation>> {
        self.scan_values(CF_RESERVATIONS, &[])
    }

    /// Reservations with `from <= scheduled_start <= to`, ordered by start
    pub fn reservations_starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let start = index_key(tag::BY_START, &[&ts_key(from)]);
        let end = ts_key(to);

        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, _) = item?;
            if key.first() != Some(&tag::BY_START) || key.len() < 9 || key[1..9] > end[..] {
                break;
            }
            if let Some(reservation) = self.find_reservation(uuid_suffix(&key)?)? {
                out.push(reservation);
            }
        }
        Ok(out)
    }

    fn reservations_under(&self, prefix: &[u8]) -> Result<Vec<Reservation>> {
        let mut out = self
            .index_ids(prefix)?
            .into_iter()
            .filter_map(|id| self.find_reservation(id).transpose())
            .collect::<Result<Vec<_>>>()?;
        out.sort_by_key(|r| r.scheduled_start);
        Ok(out)
    }

    /// Insert a reservation with its claim and indices
    pub fn insert_reservation(&self, reservation: &Reservation) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(
            &mut batch,
            CF_RESERVATIONS,
            reservation.id.as_bytes(),
            reservation,
        )?;
        for (key, value) in reservation_index_entries(reservation) {
            self.index(&mut batch, &key, &value)?;
        }
        self.write(batch)
    }

    /// Remove a reservation that was never exposed, releasing its claim
    pub fn remove_reservation(&self, reservation: &Reservation) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.delete(&mut batch, CF_RESERVATIONS, reservation.id.as_bytes())?;
        for (key, _) in reservation_index_entries(reservation) {
            self.unindex(&mut batch, &key)?;
        }
        self.write(batch)
    }

    /// Replace a reservation and enqueue effects in one write
    pub fn update_reservation(
        &self,
        reservation: &Reservation,
        effects: &[Effect],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(
            &mut batch,
            CF_RESERVATIONS,
            reservation.id.as_bytes(),
            reservation,
        )?;
        self.stage_effects(&mut batch, effects, now)?;
        self.write(batch)
    }

    /// Delete an account; reservations keep their history with the
    /// account's party reference cleared
    pub fn delete_account(&self, account: AccountId) -> Result<usize> {
        let mut batch = WriteBatch::default();
        let mut detached = 0;

        let mut affected = self.reservations_by_provider(account)?;
        for reservation in self.reservations_by_consumer(account)? {
            if !affected.iter().any(|r| r.id == reservation.id) {
                affected.push(reservation);
            }
        }

        for mut reservation in affected {
            for (key, _) in reservation_index_entries(&reservation) {
                self.unindex(&mut batch, &key)?;
            }
            if reservation.provider_id == Some(account) {
                reservation.provider_id = None;
            }
            if reservation.consumer_id == Some(account) {
                reservation.consumer_id = None;
            }
            for (key, value) in reservation_index_entries(&reservation) {
                self.index(&mut batch, &key, &value)?;
            }
            self.put(
                &mut batch,
                CF_RESERVATIONS,
                reservation.id.as_bytes(),
                &reservation,
            )?;
            detached += 1;
        }

        self.delete(&mut batch, CF_ACCOUNTS, account.as_bytes())?;
        self.write(batch)?;
        Ok(detached)
    }

    // Settlement

    /// Mark paid, write both ledger entries and enqueue effects in one write
    pub fn commit_settlement(
        &self,
        reservation: &Reservation,
        plan: &SettlementPlan,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        self.put(
            &mut batch,
            CF_RESERVATIONS,
            reservation.id.as_bytes(),
            reservation,
        )?;

        let platform = &plan.platform_entry;
        self.put(
            &mut batch,
            CF_PLATFORM_INCOME,
            platform.id.as_bytes(),
            platform,
        )?;

        let provider = &plan.provider_entry;
        let mut provider_key = provider.provider_id.as_bytes().to_vec();
        provider_key.extend_from_slice(provider.id.as_bytes());
        self.put(&mut batch, CF_PROVIDER_INCOME, &provider_key, provider)?;

        self.index(
            &mut batch,
            &index_key(tag::SETTLED, &[reservation.id.as_bytes()]),
            platform.id.as_bytes(),
        )?;

        self.stage_effects(&mut batch, &plan.effects, now)?;
        self.write(batch)?;

        tracing::info!(
            reservation_id = %reservation.id,
            gross = %platform.gross_amount,
            platform_share = %platform.after_deduction,
            provider_share = %provider.after_deduction,
            "Settlement committed"
        );

        Ok(())
    }

    /// Platform ledger, oldest first
    pub fn platform_entries(&self) -> Result<Vec<PlatformLedgerEntry>> {
        self.scan_values(CF_PLATFORM_INCOME, &[])
    }

    /// Provider ledger of one provider, oldest first
    pub fn provider_entries(&self, provider: AccountId) -> Result<Vec<ProviderLedgerEntry>> {
        self.scan_values(CF_PROVIDER_INCOME, provider.as_bytes())
    }

    /// Whether ledger entries exist for a reservation
    pub fn is_settled(&self, reservation: ReservationId) -> Result<bool> {
        Ok(self
            .lookup(&index_key(tag::SETTLED, &[reservation.as_bytes()]))?
            .is_some())
    }

    // Settings

    /// Current deduction policy
    pub fn deduction_policy(&self) -> Result<Option<DeductionPolicy>> {
        self.get(CF_SETTINGS, KEY_DEDUCTION_POLICY)
    }

    /// Replace the deduction policy
    pub fn put_deduction_policy(&self, policy: &DeductionPolicy) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_SETTINGS, KEY_DEDUCTION_POLICY, policy)?;
        self.write(batch)
    }

    // Subscriptions

    /// Subscription registered for a payment intent
    pub fn subscription_by_intent(&self, payment_intent: &str) -> Result<Option<Subscription>> {
        match self.lookup(&index_key(tag::PAYMENT_INTENT, &[payment_intent.as_bytes()]))? {
            Some(id) => self.get(CF_SUBSCRIPTIONS, id.as_bytes()),
            None => Ok(None),
        }
    }

    /// Subscriptions of an account
    pub fn subscriptions_for_account(&self, account: AccountId) -> Result<Vec<Subscription>> {
        let prefix = index_key(tag::SUBSCRIPTION_BY_ACCOUNT, &[account.as_bytes()]);
        self.index_ids(&prefix)?
            .into_iter()
            .filter_map(|id| {
                self.get::<Subscription>(CF_SUBSCRIPTIONS, id.as_bytes())
                    .transpose()
            })
            .collect()
    }

    /// Write a subscription and the updated account in one write
    pub fn upsert_subscription(&self, subscription: &Subscription, account: &Account) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(
            &mut batch,
            CF_SUBSCRIPTIONS,
            subscription.id.as_bytes(),
            subscription,
        )?;
        self.index(
            &mut batch,
            &index_key(
                tag::PAYMENT_INTENT,
                &[subscription.payment_intent.as_bytes()],
            ),
            subscription.id.as_bytes(),
        )?;
        self.index(
            &mut batch,
            &index_key(
                tag::SUBSCRIPTION_BY_ACCOUNT,
                &[subscription.account_id.as_bytes(), subscription.id.as_bytes()],
            ),
            &[],
        )?;
        self.put(&mut batch, CF_ACCOUNTS, account.id.as_bytes(), account)?;
        self.write(batch)
    }

    // Outbox

    fn stage_effects(
        &self,
        batch: &mut WriteBatch,
        effects: &[Effect],
        now: DateTime<Utc>,
    ) -> Result<()> {
        for effect in effects {
            let entry = OutboxEntry::new(effect.clone(), now);
            self.put(batch, CF_OUTBOX, &outbox_key(&entry), &entry)?;
        }
        Ok(())
    }

    /// Enqueue effects on their own
    pub fn enqueue(&self, effects: &[Effect], now: DateTime<Utc>) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_effects(&mut batch, effects, now)?;
        self.write(batch)
    }

    /// Entries due at `now`, oldest first, at most `limit`
    pub fn due_outbox(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>> {
        let cf = self.cf_handle(CF_OUTBOX)?;
        let horizon = ts_key(now);

        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            if out.len() >= limit || key.len() < 8 || key[..8] > horizon[..] {
                break;
            }
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    /// All pending entries
    pub fn pending_outbox(&self) -> Result<Vec<OutboxEntry>> {
        self.scan_values(CF_OUTBOX, &[])
    }

    /// Delete a delivered entry
    pub fn complete_outbox(&self, entry: &OutboxEntry) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.delete(&mut batch, CF_OUTBOX, &outbox_key(entry))?;
        self.write(batch)
    }

    /// Replace `previous` with `next` (new due time, attempt count or effect)
    pub fn reschedule_outbox(&self, previous: &OutboxEntry, next: &OutboxEntry) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.delete(&mut batch, CF_OUTBOX, &outbox_key(previous))?;
        self.put(&mut batch, CF_OUTBOX, &outbox_key(next), next)?;
        self.write(batch)
    }

    /// Move an exhausted entry to the dead-letter column family
    pub fn dead_letter(&self, previous: &OutboxEntry, last: &OutboxEntry) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.delete(&mut batch, CF_OUTBOX, &outbox_key(previous))?;
        self.put(&mut batch, CF_DEAD_LETTERS, last.id.as_bytes(), last)?;
        self.write(batch)
    }

    /// Dead-lettered entries
    pub fn dead_letters(&self) -> Result<Vec<OutboxEntry>> {
        self.scan_values(CF_DEAD_LETTERS, &[])
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

// Key helpers

fn index_key(tag: u8, parts: &[&[u8]]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + parts.iter().map(|p| p.len()).sum::<usize>());
    key.push(tag);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

/// Big-endian millis with the sign bit flipped, so keys sort by time
fn ts_key(ts: DateTime<Utc>) -> [u8; 8] {
    ((ts.timestamp_millis() as u64) ^ (1 << 63)).to_be_bytes()
}

fn claim_key(offering: OfferingId, start: DateTime<Utc>) -> Vec<u8> {
    index_key(tag::SLOT_CLAIM, &[offering.as_bytes(), &ts_key(start)])
}

fn outbox_key(entry: &OutboxEntry) -> Vec<u8> {
    let mut key = ts_key(entry.next_attempt_at).to_vec();
    key.extend_from_slice(entry.id.as_bytes());
    key
}

fn decode_uuid(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(|e| Error::Storage(format!("Corrupt index value: {}", e)))
}

fn uuid_suffix(key: &[u8]) -> Result<Uuid> {
    if key.len() < 16 {
        return Err(Error::Storage("Corrupt index key".to_string()));
    }
    decode_uuid(&key[key.len() - 16..])
}

fn reservation_index_entries(reservation: &Reservation) -> Vec<(Vec<u8>, Vec<u8>)> {
    let id = reservation.id.as_bytes();
    let mut entries = vec![
        (
            index_key(tag::CHANNEL, &[reservation.channel_name.as_bytes()]),
            id.to_vec(),
        ),
        (
            index_key(tag::BY_START, &[&ts_key(reservation.scheduled_start), id]),
            Vec::new(),
        ),
    ];

    if let Some(offering) = reservation.offering_id {
        entries.push((claim_key(offering, reservation.scheduled_start), id.to_vec()));
    }
    if let Some(provider) = reservation.provider_id {
        entries.push((
            index_key(tag::BY_PROVIDER, &[provider.as_bytes(), id]),
            Vec::new(),
        ));
    }
    if let Some(consumer) = reservation.consumer_id {
        entries.push((
            index_key(tag::BY_CONSUMER, &[consumer.as_bytes(), id]),
            Vec::new(),
        ));
    }
    if let (Some(provider), Some(consumer)) = (reservation.provider_id, reservation.consumer_id) {
        entries.push((
            index_key(tag::PAIR, &[provider.as_bytes(), consumer.as_bytes(), id]),
            Vec::new(),
        ));
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Role, TrainingType};
    use chrono::{Duration, NaiveTime, TimeZone};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_reservation(offering: &Offering, consumer: AccountId) -> Reservation {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        Reservation {
            id: Uuid::new_v4(),
            offering_id: Some(offering.id),
            provider_id: Some(offering.provider_id),
            consumer_id: Some(consumer),
            channel_name: format!("p_c_{}", &Uuid::new_v4().simple().to_string()[..6]),
            scheduled_start: start,
            duration_minutes: 60,
            paid: false,
            reminder_sent: false,
            notification_reminder_sent: false,
            checkout_session_id: None,
            created_at: Utc::now(),
            paid_at: None,
        }
    }

    #[test]
    fn test_storage_open() {
        let (storage, _temp) = test_storage();
        for name in ALL_CFS {
            assert!(storage.db.cf_handle(name).is_some());
        }
    }

    #[test]
    fn test_account_roundtrip() {
        let (storage, _temp) = test_storage();
        let account = Account::new("coach", "Coach Carter", "coach@example.com", Role::Teacher);
        storage.put_account(&account).unwrap();
        assert_eq!(storage.get_account(account.id).unwrap(), account);
        assert!(matches!(
            storage.get_account(Uuid::new_v4()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_offering_indices() {
        let (storage, _temp) = test_storage();
        let provider = Uuid::new_v4();
        let offering =
            Offering::new(provider, TrainingType::Virtual, Decimal::new(5000, 2)).unwrap();
        storage.insert_offering(&offering).unwrap();

        assert_eq!(
            storage
                .offering_by_type(provider, TrainingType::Virtual)
                .unwrap(),
            Some(offering.id)
        );
        assert_eq!(
            storage
                .offering_by_type(provider, TrainingType::Mindset)
                .unwrap(),
            None
        );
        assert_eq!(storage.offerings_by_provider(provider).unwrap().len(), 1);
    }

    #[test]
    fn test_slot_prune_removes_window() {
        let (storage, _temp) = test_storage();
        let offering =
            Offering::new(Uuid::new_v4(), TrainingType::Mindset, Decimal::new(2000, 2)).unwrap();
        storage.insert_offering(&offering).unwrap();

        let window = AvailabilityWindow {
            id: Uuid::new_v4(),
            offering_id: offering.id,
            day: Weekday::Monday,
        };
        let slot = TimeSlot {
            id: Uuid::new_v4(),
            window_id: window.id,
            start: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
        };
        storage.insert_slot(Some(&window), &slot).unwrap();
        assert!(storage
            .window_for_day(offering.id, Weekday::Monday)
            .unwrap()
            .is_some());

        storage.delete_slot(&slot, Some(&window)).unwrap();
        assert!(storage.find_slot(slot.id).unwrap().is_none());
        assert!(storage
            .window_for_day(offering.id, Weekday::Monday)
            .unwrap()
            .is_none());
        assert!(storage.windows_for_offering(offering.id).unwrap().is_empty());
    }

    #[test]
    fn test_reservation_claim_and_removal() {
        let (storage, _temp) = test_storage();
        let offering =
            Offering::new(Uuid::new_v4(), TrainingType::Virtual, Decimal::new(5000, 2)).unwrap();
        let reservation = test_reservation(&offering, Uuid::new_v4());

        storage.insert_reservation(&reservation).unwrap();
        assert_eq!(
            storage
                .slot_claim(offering.id, reservation.scheduled_start)
                .unwrap(),
            Some(reservation.id)
        );
        assert!(storage.channel_taken(&reservation.channel_name).unwrap());

        storage.remove_reservation(&reservation).unwrap();
        assert!(storage
            .slot_claim(offering.id, reservation.scheduled_start)
            .unwrap()
            .is_none());
        assert!(!storage.channel_taken(&reservation.channel_name).unwrap());
    }

    #[test]
    fn test_delete_offering_detaches_reservations() {
        let (storage, _temp) = test_storage();
        let offering =
            Offering::new(Uuid::new_v4(), TrainingType::Virtual, Decimal::new(5000, 2)).unwrap();
        storage.insert_offering(&offering).unwrap();
        let reservation = test_reservation(&offering, Uuid::new_v4());
        storage.insert_reservation(&reservation).unwrap();

        assert_eq!(storage.delete_offering(&offering).unwrap(), 1);
        assert!(storage.find_offering(offering.id).unwrap().is_none());
        let kept = storage.get_reservation(reservation.id).unwrap();
        assert_eq!(kept.offering_id, None);
        assert_eq!(kept.provider_id, reservation.provider_id);
    }

    #[test]
    fn test_reservations_starting_between() {
        let (storage, _temp) = test_storage();
        let offering =
            Offering::new(Uuid::new_v4(), TrainingType::Virtual, Decimal::new(5000, 2)).unwrap();
        let base = test_reservation(&offering, Uuid::new_v4());

        for offset in [0, 30, 120] {
            let mut reservation = base.clone();
            reservation.id = Uuid::new_v4();
            reservation.channel_name = format!("chan_{}", offset);
            reservation.scheduled_start = base.scheduled_start + Duration::minutes(offset);
            storage.insert_reservation(&reservation).unwrap();
        }

        let found = storage
            .reservations_starting_between(
                base.scheduled_start + Duration::minutes(29),
                base.scheduled_start + Duration::minutes(31),
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].scheduled_start,
            base.scheduled_start + Duration::minutes(30)
        );
    }

    #[test]
    fn test_outbox_due_ordering() {
        let (storage, _temp) = test_storage();
        let now = Utc::now();
        let effect = Effect::Notify(crate::types::NotificationRequest {
            recipient_id: Uuid::new_v4(),
            header: "h".to_string(),
            detail: "d".to_string(),
            onclick_location: "/".to_string(),
        });
        storage.enqueue(&[effect.clone(), effect], now).unwrap();

        let due = storage.due_outbox(now, 10).unwrap();
        assert_eq!(due.len(), 2);

        let mut later = due[0].clone();
        later.attempts = 1;
        later.next_attempt_at = now + Duration::seconds(10);
        storage.reschedule_outbox(&due[0], &later).unwrap();

        assert_eq!(storage.due_outbox(now, 10).unwrap().len(), 1);
        assert_eq!(storage.pending_outbox().unwrap().len(), 2);

        storage.dead_letter(&later, &later).unwrap();
        assert_eq!(storage.pending_outbox().unwrap().len(), 1);
        assert_eq!(storage.dead_letters().unwrap().len(), 1);
    }
}
