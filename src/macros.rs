// Declarative construction macros for values and records.

/// Create a [`Value::Object`](crate::Value) from attribute pairs.
///
/// Keys are converted to strings and values to [`Value`](crate::Value):
///
/// ```
/// use stencil::record;
///
/// let user = record! { "name" => "Ada", "logins" => 3, "active" => true };
/// assert_eq!(user.attr("logins"), Some(3.into()));
/// ```
#[macro_export]
macro_rules! record {
    {} => {
        $crate::Value::from($crate::Record::new())
    };
    { $($name:expr => $value:expr),* $(,)? } => {
        {
            let mut record = $crate::Record::new();
            $( record.set($name, $value); )*
            $crate::Value::from(record)
        }
    };
}

/// Create a [`Value::List`](crate::Value) from elements convertible into
/// [`Value`](crate::Value).
///
/// ```
/// use stencil::{vlist, Value};
///
/// let values = vlist![1, "two", false];
/// assert_eq!(values, Value::List(vec![1.into(), "two".into(), false.into()]));
/// ```
#[macro_export]
macro_rules! vlist {
    [] => {
        $crate::Value::List(Vec::new())
    };
    [ $($value:expr),* $(,)? ] => {
        $crate::Value::List(vec![ $( $crate::Value::from($value) ),* ])
    };
}
