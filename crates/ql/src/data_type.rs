use serde::{Deserialize, Serialize};

/// Data type of a field or tag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Type could not be determined from any shard.
    Unknown,
    /// 64-bit float field.
    Float,
    /// 64-bit signed integer field.
    Integer,
    /// 64-bit unsigned integer field.
    Unsigned,
    /// String field.
    String,
    /// Boolean field.
    Boolean,
    /// Tag value (always a string, but addressed separately from fields).
    Tag,
}

impl DataType {
    /// Merge precedence when shards disagree about a field's type.
    ///
    /// float > integer > unsigned > boolean > string > tag; unknown loses
    /// to anything.
    fn precedence(self) -> u8 {
        match self {
            DataType::Float => 6,
            DataType::Integer => 5,
            DataType::Unsigned => 4,
            DataType::Boolean => 3,
            DataType::String => 2,
            DataType::Tag => 1,
            DataType::Unknown => 0,
        }
    }

    /// Returns true if `other` wins a widest-type merge against `self`.
    pub fn less_than(self, other: DataType) -> bool {
        self.precedence() < other.precedence()
    }

    /// Widest-wins merge of two observed types for the same field.
    pub fn merge(self, other: DataType) -> DataType {
        if self.less_than(other) {
            other
        } else {
            self
        }
    }

    /// Returns true for float, integer, and unsigned fields.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Float | DataType::Integer | DataType::Unsigned
        )
    }
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::DataType;

    #[test]
    fn widest_type_wins() {
        assert_eq!(DataType::Float.merge(DataType::Integer), DataType::Float);
        assert_eq!(DataType::Integer.merge(DataType::Float), DataType::Float);
        assert_eq!(
            DataType::Unsigned.merge(DataType::Boolean),
            DataType::Unsigned
        );
        assert_eq!(DataType::Boolean.merge(DataType::String), DataType::Boolean);
        assert_eq!(DataType::Unknown.merge(DataType::String), DataType::String);
        assert_eq!(DataType::Unknown.merge(DataType::Tag), DataType::Tag);
    }
}
