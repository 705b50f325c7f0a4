/// Primary-collection key; scanning order is the byte order of this string.
/// Example: `doc_000042`
pub type DocumentKey = String;
/// Collection name inside a document store.
/// Examples: `documents`, `repositories`, `items`
pub type CollectionName = String;
/// Identifier of an auxiliary repository record.
/// Example: `R1`
pub type RepositoryId = String;
/// Identifier of a tertiary item record (the batch foreign key).
/// Example: `I2`
pub type ItemId = String;
/// Identifier of a body (the linking value compared across collections).
/// Examples: `bodyA`, `org-77`
pub type BodyId = String;
/// Identifier of the higher-level entity tracked in per-reason distinct sets.
/// Example: `I2`
pub type EntityId = String;
/// Document field name (top-level JSON key).
/// Examples: `repository`, `createdAt`
pub type FieldName = String;
