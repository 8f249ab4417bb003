//! Table and database schema, plus the tag-based binary encoding used to
//! persist a table schema in its blob.

use bytes::{Buf, BufMut};

use crate::error::WrenError;

/// The name of the primary key column appended when a table declares
/// none.
pub fn hidden_pk_name() -> String {
    "__hidden_pk__".to_string()
}

/// The companion table storing reference counts for a table's primary
/// keys.
pub fn ref_table_name(table: &str) -> String {
    format!("__refcounts_of_{}", table)
}

pub fn ref_column_name(column: &str) -> String {
    format!("__refcounts_of_col_{}", column)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int32,
    Int64,
    Float64,
    Char,
    Varchar,
}

impl FieldType {
    pub fn tag(&self) -> u8 {
        match self {
            FieldType::Int32 => 0,
            FieldType::Int64 => 1,
            FieldType::Float64 => 2,
            FieldType::Char => 3,
            FieldType::Varchar => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Result<FieldType, WrenError> {
        match tag {
            0 => Ok(FieldType::Int32),
            1 => Ok(FieldType::Int64),
            2 => Ok(FieldType::Float64),
            3 => Ok(FieldType::Char),
            4 => Ok(FieldType::Varchar),
            _ => Err(WrenError::io(&format!("bad field type tag {}", tag))),
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, FieldType::Char | FieldType::Varchar)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Int32 | FieldType::Int64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub field_type: FieldType,
    /// Byte width for fixed types, maximum length for CHAR/VARCHAR.
    pub size: u32,
}

impl ColumnSchema {
    pub fn new(name: &str, field_type: FieldType, size: u32) -> ColumnSchema {
        ColumnSchema {
            name: name.to_string(),
            field_type,
            size,
        }
    }

    pub fn int32(name: &str) -> ColumnSchema {
        Self::new(name, FieldType::Int32, 4)
    }

    pub fn int64(name: &str) -> ColumnSchema {
        Self::new(name, FieldType::Int64, 8)
    }

    pub fn float64(name: &str) -> ColumnSchema {
        Self::new(name, FieldType::Float64, 8)
    }

    pub fn char(name: &str, size: u32) -> ColumnSchema {
        Self::new(name, FieldType::Char, size)
    }

    pub fn varchar(name: &str, size: u32) -> ColumnSchema {
        Self::new(name, FieldType::Varchar, size)
    }
}

/// A foreign key declared on one column, referencing another table's
/// primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeySchema {
    pub column_index: u32,
    pub ref_table: String,
    pub ref_column: String,
    pub column_name: String,
    pub field_type: FieldType,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    // Logical column order, as declared.
    columns: Vec<ColumnSchema>,
    // Storage order: fixed-width columns first, strings last.
    storage_columns: Vec<ColumnSchema>,
    // storage position -> logical index
    storage_order: Vec<usize>,
    pk_index: usize,
    auto_gen_pk: bool,
    hidden_pk: bool,
    foreign_keys: Vec<ForeignKeySchema>,
}

impl TableSchema {
    pub fn new(
        name: &str,
        columns: Vec<ColumnSchema>,
        pk_index: usize,
        auto_gen_pk: bool,
        hidden_pk: bool,
        foreign_keys: Vec<ForeignKeySchema>,
    ) -> TableSchema {
        assert!(pk_index < columns.len());
        let mut storage_order: Vec<usize> = (0..columns.len()).collect();
        // Stable: fixed fields keep their relative order, strings move to
        // the back.
        storage_order.sort_by_key(|&i| columns[i].field_type.is_string());
        let storage_columns = storage_order.iter().map(|&i| columns[i].clone()).collect();
        TableSchema {
            name: name.to_string(),
            columns,
            storage_columns,
            storage_order,
            pk_index,
            auto_gen_pk,
            hidden_pk,
            foreign_keys,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn storage_columns(&self) -> &[ColumnSchema] {
        &self.storage_columns
    }

    /// storage position -> logical index
    pub fn storage_order(&self) -> &[usize] {
        &self.storage_order
    }

    pub fn pk_index(&self) -> usize {
        self.pk_index
    }

    pub fn primary_key(&self) -> &ColumnSchema {
        &self.columns[self.pk_index]
    }

    pub fn auto_gen_pk(&self) -> bool {
        self.auto_gen_pk
    }

    pub fn hidden_pk(&self) -> bool {
        self.hidden_pk
    }

    pub fn foreign_keys(&self) -> &[ForeignKeySchema] {
        &self.foreign_keys
    }

    /// Number of columns visible to the user (the hidden primary key is
    /// not).
    pub fn visible_column_num(&self) -> usize {
        if self.hidden_pk {
            self.columns.len() - 1
        } else {
            self.columns.len()
        }
    }

    /// Serialize together with the table's tick counter.
    pub fn encode(&self, ticks: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        put_string(&mut buf, &self.name);
        buf.put_u32_le(self.columns.len() as u32);
        for col in &self.columns {
            put_string(&mut buf, &col.name);
            buf.put_u8(col.field_type.tag());
            buf.put_u32_le(col.size);
        }
        buf.put_u32_le(self.pk_index as u32);
        buf.put_u8(self.auto_gen_pk as u8);
        buf.put_u8(self.hidden_pk as u8);
        buf.put_u32_le(self.foreign_keys.len() as u32);
        for fk in &self.foreign_keys {
            buf.put_u32_le(fk.column_index);
            put_string(&mut buf, &fk.ref_table);
            put_string(&mut buf, &fk.ref_column);
            put_string(&mut buf, &fk.column_name);
            buf.put_u8(fk.field_type.tag());
            buf.put_u32_le(fk.size);
        }
        buf.put_u64_le(ticks);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<(TableSchema, u64), WrenError> {
        let mut buf = bytes;
        let name = get_string(&mut buf)?;
        let col_num = get_u32(&mut buf)? as usize;
        let mut columns = Vec::with_capacity(col_num);
        for _ in 0..col_num {
            let col_name = get_string(&mut buf)?;
            let field_type = FieldType::from_tag(get_u8(&mut buf)?)?;
            let size = get_u32(&mut buf)?;
            columns.push(ColumnSchema::new(&col_name, field_type, size));
        }
        let pk_index = get_u32(&mut buf)? as usize;
        let auto_gen_pk = get_u8(&mut buf)? != 0;
        let hidden_pk = get_u8(&mut buf)? != 0;
        let fk_num = get_u32(&mut buf)? as usize;
        let mut foreign_keys = Vec::with_capacity(fk_num);
        for _ in 0..fk_num {
            let column_index = get_u32(&mut buf)?;
            let ref_table = get_string(&mut buf)?;
            let ref_column = get_string(&mut buf)?;
            let column_name = get_string(&mut buf)?;
            let field_type = FieldType::from_tag(get_u8(&mut buf)?)?;
            let size = get_u32(&mut buf)?;
            foreign_keys.push(ForeignKeySchema {
                column_index,
                ref_table,
                ref_column,
                column_name,
                field_type,
                size,
            });
        }
        let ticks = get_u64(&mut buf)?;
        if pk_index >= columns.len() {
            return Err(WrenError::io("bad schema: pk index out of range"));
        }
        Ok((
            TableSchema::new(&name, columns, pk_index, auto_gen_pk, hidden_pk, foreign_keys),
            ticks,
        ))
    }
}

/// The schema of the whole database: a list of tables.
#[derive(Debug, Clone, Default)]
pub struct DBSchema {
    tables: Vec<TableSchema>,
}

impl DBSchema {
    pub fn new() -> DBSchema {
        DBSchema { tables: Vec::new() }
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.tables.iter().position(|t| t.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.find(name).map(|i| &self.tables[i])
    }

    pub fn add_table(&mut self, schema: TableSchema) {
        self.tables.push(schema);
    }

    pub fn remove_table(&mut self, name: &str) {
        if let Some(i) = self.find(name) {
            self.tables.remove(i);
        }
    }
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_u8(buf: &mut &[u8]) -> Result<u8, WrenError> {
    if buf.remaining() < 1 {
        return Err(WrenError::io("truncated schema"));
    }
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32, WrenError> {
    if buf.remaining() < 4 {
        return Err(WrenError::io("truncated schema"));
    }
    Ok(buf.get_u32_le())
}

fn get_u64(buf: &mut &[u8]) -> Result<u64, WrenError> {
    if buf.remaining() < 8 {
        return Err(WrenError::io("truncated schema"));
    }
    Ok(buf.get_u64_le())
}

fn get_string(buf: &mut &[u8]) -> Result<String, WrenError> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(WrenError::io("truncated schema"));
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| WrenError::io("schema string is not utf-8"))
}
