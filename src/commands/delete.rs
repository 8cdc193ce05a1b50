//! `issue-reconciler delete` command.

use crate::context::ServiceContext;
use crate::error::Result;
use crate::ports::store::ResourceStore;
use crate::resource::ResourceKey;

/// Execute the `delete` command.
///
/// A record protected by the finalizer stays until a controller pass has
/// closed its issue; an unprotected record is erased at once.
///
/// # Errors
///
/// Returns an error if the record does not exist or the store fails.
pub fn run(ctx: &ServiceContext, name: &str) -> Result<()> {
    let store = ctx.store();
    match store.request_deletion(&ResourceKey::new(name))? {
        None => println!("{name} deleted"),
        Some(_) => {
            println!("{name} marked for deletion; its issue will be closed on the next pass");
        }
    }
    Ok(())
}
