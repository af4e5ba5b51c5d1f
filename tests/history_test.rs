//! End-to-end scenarios over a top-level history
//!
//! Every scenario runs against both backends: an in-memory store and a
//! file on disk.

use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;
use xitdb::error::{Error, Result};
use xitdb::{
    Bytes, Core, CoreFile, CoreMemory, Database, Hasher, ReadArrayList, ReadHashMap,
    ReadLinkedArrayList, Tag, WriteArrayList, WriteHashMap, WriteLinkedArrayList,
};

const MAX_READ_BYTES: Option<u64> = Some(1024);

/// Opens a fresh handle over the same bytes and appends junk to them
trait Backend {
    fn open(&self) -> Result<Database>;
    fn append_junk(&self, junk: &[u8]) -> Result<()>;
    fn length(&self) -> Result<u64>;
}

struct MemoryBackend {
    memory: CoreMemory,
}

impl Backend for MemoryBackend {
    fn open(&self) -> Result<Database> {
        Database::open(Box::new(self.memory.clone_handle()), Hasher::default())
    }

    fn append_junk(&self, junk: &[u8]) -> Result<()> {
        let mut handle = self.memory.clone_handle();
        handle.seek(SeekFrom::End(0))?;
        handle.write_all(junk)?;
        Ok(())
    }

    fn length(&self) -> Result<u64> {
        Ok(self.memory.clone_handle().length()?)
    }
}

struct FileBackend<'p> {
    path: &'p Path,
}

impl Backend for FileBackend<'_> {
    fn open(&self) -> Result<Database> {
        Database::open(Box::new(CoreFile::open(self.path)?), Hasher::default())
    }

    fn append_junk(&self, junk: &[u8]) -> Result<()> {
        let mut file = std::fs::OpenOptions::new().append(true).open(self.path)?;
        file.write_all(junk)?;
        file.sync_all()?;
        Ok(())
    }

    fn length(&self) -> Result<u64> {
        Ok(std::fs::metadata(self.path)?.len())
    }
}

fn read_string(cursor: Option<xitdb::ReadCursor<'_>>) -> Result<String> {
    let cursor = cursor.ok_or(Error::KeyNotFound)?;
    let bytes = cursor.read_bytes(MAX_READ_BYTES)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn moment_at(db: &Database, index: i64) -> Result<ReadHashMap<'_>> {
    let history = ReadArrayList::new(db.root_read_cursor())?;
    let cursor = history.get_cursor(index)?.ok_or(Error::KeyNotFound)?;
    ReadHashMap::new(cursor)
}

fn list_at<'a>(moment: &ReadHashMap<'a>, key: &str) -> Result<ReadArrayList<'a>> {
    ReadArrayList::new(moment.get_cursor(key)?.ok_or(Error::KeyNotFound)?)
}

fn linked_at<'a>(moment: &ReadHashMap<'a>, key: &str) -> Result<ReadLinkedArrayList<'a>> {
    ReadLinkedArrayList::new(moment.get_cursor(key)?.ok_or(Error::KeyNotFound)?)
}

fn map_at<'a>(moment: &ReadHashMap<'a>, key: &str) -> Result<ReadHashMap<'a>> {
    ReadHashMap::new(moment.get_cursor(key)?.ok_or(Error::KeyNotFound)?)
}

/// Checks that hold for the first moment no matter what came later
fn assert_first_moment(moment: &ReadHashMap<'_>) -> Result<()> {
    assert_eq!(read_string(moment.get_cursor("foo")?)?, "foo");
    assert_eq!(moment.get("foo")?.map(|s| s.tag), Some(Tag::ShortBytes));
    assert_eq!(moment.get("bar")?.map(|s| s.tag), Some(Tag::ShortBytes));

    let fruits = list_at(moment, "fruits")?;
    assert_eq!(fruits.count()?, 3);
    assert_eq!(read_string(fruits.get_cursor(0)?)?, "apple");

    let people = list_at(moment, "people")?;
    assert_eq!(people.count()?, 2);
    let alice = ReadHashMap::new(people.get_cursor(0)?.ok_or(Error::KeyNotFound)?)?;
    let age = alice.get_cursor("age")?.ok_or(Error::KeyNotFound)?;
    assert_eq!(age.read_uint()?, 25);

    let todos = linked_at(moment, "todos")?;
    assert_eq!(todos.count()?, 3);
    assert_eq!(read_string(todos.get_cursor(0)?)?, "Pay the bills");
    Ok(())
}

fn first_transaction(db: &Database) -> Result<()> {
    let history = WriteArrayList::new(&db.root_cursor())?;
    let last = history.get(-1)?.unwrap_or_default();
    history.append_context(last, |cursor| {
        let moment = WriteHashMap::new(cursor)?;
        moment.put("foo", "foo")?;
        moment.put("bar", "bar")?;

        let fruits = WriteArrayList::new(&moment.put_cursor("fruits")?)?;
        fruits.append("apple")?;
        fruits.append("pear")?;
        fruits.append("grape")?;

        let people = WriteArrayList::new(&moment.put_cursor("people")?)?;
        let alice = WriteHashMap::new(&people.append_cursor()?)?;
        alice.put("name", "Alice")?;
        alice.put("age", 25u64)?;
        let bob = WriteHashMap::new(&people.append_cursor()?)?;
        bob.put("name", "Bob")?;
        bob.put("age", 42u64)?;

        let todos = WriteLinkedArrayList::new(&moment.put_cursor("todos")?)?;
        todos.append("Pay the bills")?;
        todos.append("Get an oil change")?;
        todos.insert(1, "Wash the car")?;

        // an inserted collection can be removed again
        WriteHashMap::new(&todos.insert_cursor(1)?)?;
        todos.remove(1)?;

        let letters = WriteHashMap::new(&moment.put_cursor("letters")?)?;
        letters.put("a", 1u64)?;
        letters.put("a", 2u64)?;
        letters.put("c", 2u64)?;

        moment.put(
            "random-number",
            Bytes::with_format_tag(vec![0x7f, 0x01, 0x00, 0x22, 0x91, 0x03, 0x44, 0x09, 0x10], b"bi")?,
        )?;

        let mut long_text = moment.put_cursor("long-text")?;
        let mut writer = long_text.writer()?;
        for _ in 0..50 {
            writer.write_all(b"hello, world\n")?;
        }
        writer.finish()?;
        Ok(())
    })
}

fn second_transaction(db: &Database) -> Result<()> {
    let history = WriteArrayList::new(&db.root_cursor())?;
    let last = history.get(-1)?.unwrap_or_default();
    history.append_context(last, |cursor| {
        let moment = WriteHashMap::new(cursor)?;

        assert!(moment.remove("bar")?);
        assert!(!moment.remove("doesn't exist")?);

        let fruits = WriteArrayList::new(&moment.put_cursor("fruits")?)?;
        fruits.put(0, "lemon")?;
        fruits.slice(2)?;

        let people = WriteArrayList::new(&moment.put_cursor("people")?)?;
        let alice = WriteHashMap::new(&people.put_cursor(0)?)?;
        alice.put("age", 26u64)?;

        let todos = WriteLinkedArrayList::new(&moment.put_cursor("todos")?)?;
        todos.concat(todos.slot())?;
        todos.slice(1, 2)?;
        todos.remove(1)?;

        let letters = WriteHashMap::new(&moment.put_cursor("letters")?)?;
        letters.remove("b")?;
        letters.remove("c")?;
        Ok(())
    })
}

fn run_history_scenario(backend: &dyn Backend) -> Result<()> {
    let db = backend.open()?;

    first_transaction(&db)?;
    {
        let moment = moment_at(&db, -1)?;
        assert_first_moment(&moment)?;

        let people = list_at(&moment, "people")?;
        for person in people.iter()? {
            let person = ReadHashMap::new(person?)?;
            for entry in person.iter()? {
                let pair = entry?.read_key_value_pair()?;
                pair.key_cursor.read_bytes(MAX_READ_BYTES)?;
                match pair.value_cursor.slot().tag {
                    Tag::ShortBytes | Tag::Bytes => {
                        pair.value_cursor.read_bytes(MAX_READ_BYTES)?;
                    }
                    Tag::Uint => {
                        pair.value_cursor.read_uint()?;
                    }
                    other => return Err(Error::UnexpectedTag(other)),
                }
            }
        }

        let letters = map_at(&moment, "letters")?;
        assert_eq!(letters.iter()?.count(), 2);
        assert_eq!(letters.get_cursor("a")?.ok_or(Error::KeyNotFound)?.read_uint()?, 2);

        let random = moment.get_cursor("random-number")?.ok_or(Error::KeyNotFound)?;
        let random = random.read_bytes_object(MAX_READ_BYTES)?;
        assert_eq!(random.format_tag, Some(*b"bi"));
        assert_eq!(random.value.len(), 9);

        let long_text = moment.get_cursor("long-text")?.ok_or(Error::KeyNotFound)?;
        let reader = BufReader::new(long_text.reader()?);
        let mut lines = 0;
        for line in reader.lines() {
            assert_eq!(line?, "hello, world");
            lines += 1;
        }
        assert_eq!(lines, 50);
    }

    second_transaction(&db)?;
    {
        let moment = moment_at(&db, -1)?;
        assert!(moment.get_cursor("bar")?.is_none());

        let fruits_key = moment.get_key_cursor("fruits")?;
        assert_eq!(read_string(fruits_key)?, "fruits");

        let fruits = list_at(&moment, "fruits")?;
        assert_eq!(fruits.count()?, 2);
        assert_eq!(read_string(fruits.get_cursor(0)?)?, "lemon");

        let pair = moment
            .get_key_value_pair("fruits")?
            .ok_or(Error::KeyNotFound)?;
        assert_eq!(pair.key_cursor.slot().tag, Tag::ShortBytes);
        assert_eq!(pair.value_cursor.slot().tag, Tag::ArrayList);

        let people = list_at(&moment, "people")?;
        let alice = ReadHashMap::new(people.get_cursor(0)?.ok_or(Error::KeyNotFound)?)?;
        assert_eq!(alice.get_cursor("age")?.ok_or(Error::KeyNotFound)?.read_uint()?, 26);

        let todos = linked_at(&moment, "todos")?;
        assert_eq!(todos.count()?, 1);
        assert_eq!(read_string(todos.get_cursor(0)?)?, "Wash the car");

        let letters = map_at(&moment, "letters")?;
        assert_eq!(letters.iter()?.count(), 1);
        assert!(letters.get_cursor("c")?.is_none());
    }

    // the first moment is untouched
    assert_first_moment(&moment_at(&db, 0)?)?;

    // dropping the last moment brings the first one back to the front
    WriteArrayList::new(&db.root_cursor())?.slice(1)?;
    assert_first_moment(&moment_at(&db, -1)?)?;
    drop(db);

    // junk after the last commit disappears on reopen
    let size_before = backend.length()?;
    backend.append_junk(b"this is junk data that will be deleted during init")?;
    assert!(backend.length()? > size_before);
    let db = backend.open()?;
    assert_eq!(backend.length()?, size_before);
    assert_first_moment(&moment_at(&db, -1)?)?;

    run_cloning(&db)?;
    Ok(())
}

fn run_cloning(db: &Database) -> Result<()> {
    let history = WriteArrayList::new(&db.root_cursor())?;

    // a list seeded from another list copies it on first write
    let last = history.get(-1)?.unwrap_or_default();
    history.append_context(last, |cursor| {
        let moment = WriteHashMap::new(cursor)?;
        let fruits = moment.get("fruits")?.ok_or(Error::KeyNotFound)?;

        let mut food_cursor = moment.put_cursor("food")?;
        food_cursor.write(fruits)?;
        let food = WriteArrayList::new(&food_cursor)?;
        food.append("eggs")?;
        food.append("rice")?;
        food.append("fish")?;
        Ok(())
    })?;
    {
        let moment = moment_at(db, -1)?;
        assert_eq!(list_at(&moment, "food")?.count()?, 6);
        assert_eq!(list_at(&moment, "fruits")?.count()?, 3);
    }

    // a list created in the same transaction is not protected...
    let revert_to = history.count()? as i64 - 1;
    let last = history.get(-1)?.unwrap_or_default();
    history.append_context(last, |cursor| {
        let moment = WriteHashMap::new(cursor)?;
        let big_cities = WriteArrayList::new(&moment.put_cursor("big-cities")?)?;
        big_cities.append("New York, NY")?;
        big_cities.append("Los Angeles, CA")?;

        let mut cities_cursor = moment.put_cursor("cities")?;
        cities_cursor.write(big_cities.slot())?;
        let cities = WriteArrayList::new(&cities_cursor)?;
        cities.append("Charleston, SC")?;
        cities.append("Louisville, KY")?;
        Ok(())
    })?;
    {
        let moment = moment_at(db, -1)?;
        assert_eq!(list_at(&moment, "cities")?.count()?, 4);
        assert_eq!(list_at(&moment, "big-cities")?.count()?, 4);
    }
    let previous = history.get(revert_to)?.ok_or(Error::KeyNotFound)?;
    history.append(previous)?;

    // ...unless the transaction is frozen first
    let last = history.get(-1)?.unwrap_or_default();
    history.append_context(last, |cursor| {
        let moment = WriteHashMap::new(cursor)?;
        let big_cities = WriteArrayList::new(&moment.put_cursor("big-cities")?)?;
        big_cities.append("New York, NY")?;
        big_cities.append("Los Angeles, CA")?;

        cursor.freeze()?;

        let mut cities_cursor = moment.put_cursor("cities")?;
        cities_cursor.write(big_cities.slot())?;
        let cities = WriteArrayList::new(&cities_cursor)?;
        cities.append("Charleston, SC")?;
        cities.append("Louisville, KY")?;
        Ok(())
    })?;
    let moment = moment_at(db, -1)?;
    assert_eq!(list_at(&moment, "cities")?.count()?, 4);
    assert_eq!(list_at(&moment, "big-cities")?.count()?, 2);
    Ok(())
}

#[test]
fn test_history_in_memory() -> Result<()> {
    let backend = MemoryBackend {
        memory: CoreMemory::new(),
    };
    run_history_scenario(&backend)
}

#[test]
fn test_history_on_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("history.db");
    run_history_scenario(&FileBackend { path: &path })
}

#[test]
fn test_failed_transaction_rolls_back() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("rollback.db");
    let backend = FileBackend { path: &path };
    let db = backend.open()?;

    first_transaction(&db)?;
    let committed = db.committed_length()?.ok_or(Error::KeyNotFound)?;
    assert_eq!(db.length()?, committed);

    let history = WriteArrayList::new(&db.root_cursor())?;
    let last = history.get(-1)?.unwrap_or_default();
    let result = history.append_context(last, |cursor| {
        let moment = WriteHashMap::new(cursor)?;
        moment.put("foo", "changed")?;
        moment.put("half-written", "x".repeat(500).as_str())?;
        Err(Error::Aborted("validation failed".into()))
    });

    assert!(matches!(result, Err(Error::Aborted(_))));
    assert_eq!(history.count()?, 1);
    assert_eq!(db.length()?, committed);
    let moment = moment_at(&db, -1)?;
    assert_eq!(read_string(moment.get_cursor("foo")?)?, "foo");
    assert!(moment.get_cursor("half-written")?.is_none());
    Ok(())
}

#[test]
fn test_read_only_reopen_keeps_junk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("readonly.db");
    let backend = FileBackend { path: &path };
    first_transaction(&backend.open()?)?;

    let size_before = backend.length()?;
    backend.append_junk(b"junk")?;

    // a read-only handle cannot truncate, but opening still succeeds
    let db = Database::open(Box::new(CoreFile::open_read_only(&path)?), Hasher::default())?;
    assert_eq!(backend.length()?, size_before + 4);
    assert_first_moment(&moment_at(&db, -1)?)?;
    Ok(())
}

#[test]
fn test_readers_are_independent() -> Result<()> {
    let db = Database::in_memory()?;
    first_transaction(&db)?;

    let reader = db.reader()?;
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let local = reader.reader()?;
            Ok(std::thread::spawn(move || -> Result<String> {
                let moment = moment_at(&local, 0)?;
                read_string(moment.get_cursor("foo")?)
            }))
        })
        .collect::<Result<_>>()?;

    // moving this handle's position does not disturb the threads
    assert_eq!(read_string(moment_at(&db, 0)?.get_cursor("foo")?)?, "foo");
    for handle in handles {
        let value = handle
            .join()
            .map_err(|_| Error::Aborted("reader thread panicked".into()))??;
        assert_eq!(value, "foo");
    }
    Ok(())
}
