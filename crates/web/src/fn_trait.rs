use crate::RequestContext;

/// Represents a handler function.
///
/// Only two shapes are accepted, so an invalid handler is a compile error rather than a
/// registration failure:
/// - `Fn(&mut RequestContext) -> R`
/// - `Fn(&mut RequestContext, T) -> R` where `T` is the bound argument record
pub trait FnTrait<Args> {
    type Output;
    fn call(&self, ctx: &mut RequestContext, args: Args) -> Self::Output;
}

/// impl `Fn` for `FnTrait`, with zero or one argument record after the context
///
/// for example, it will impl Fn(&mut RequestContext, A) like this:
///```ignore
/// impl<Func, R, A> FnTrait<(A,)> for Func
///    where
///        Func: Fn(&mut RequestContext, A) -> R,
/// {
///    type Output = R;
///
///    #[inline]
///    #[allow(non_snake_case)]
///    fn call(&self, ctx: &mut RequestContext, (A,): (A,)) -> Self::Output {
///        (self)(ctx, A)
///    }
/// }
///```
macro_rules! impl_fn_trait_for_fn ({ $($param:ident)* } => {
    impl<Func, R, $($param,)*> FnTrait<($($param,)*)> for Func
    where
        Func: Fn(&mut RequestContext, $($param),*) -> R,
    {
        type Output = R;

        #[inline]
        #[allow(non_snake_case, reason = "the type parameters double as binding names")]
        fn call(&self, ctx: &mut RequestContext, ($($param,)*): ($($param,)*)) -> Self::Output {
            (self)(ctx, $($param,)*)
        }
    }
});

impl_fn_trait_for_fn! {}
impl_fn_trait_for_fn! { A }
